//! Core types for the HotStuff simulator.
//!
//! This crate provides the foundational types used throughout the simulator:
//!
//! - **Primitives**: [`BlockHash`] (content addressing)
//! - **Identifiers**: [`ReplicaId`], [`ViewNumber`]
//! - **Consensus types**: [`Block`], [`QuorumCertificate`], [`Phase`]
//! - **Wire types**: [`Message`], [`Envelope`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Quorum
//! certificates are structural — a set of signer ids, not signatures — because
//! the simulator models quorum formation, not cryptography.

mod block;
mod hash;
mod identifiers;
mod message;
mod quorum_certificate;

pub use block::Block;
pub use hash::{BlockHash, HexError};
pub use identifiers::{FaultType, PacemakerKind, Phase, ReplicaId, ViewNumber};
pub use message::{Envelope, Message};
pub use quorum_certificate::QuorumCertificate;
