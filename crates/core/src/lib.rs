//! Core event/action model for the HotStuff simulator.
//!
//! This crate provides the contract between replicas and the simulation
//! driver:
//!
//! - [`ProtocolEvent`]: all possible inputs to a replica
//! - [`Action`]: all possible outputs from a replica
//! - [`TraceEvent`]: the observable record schema consumed by UI and metrics
//! - [`StateMachine`]: the trait every replica implements
//!
//! # Architecture
//!
//! The core is built on a simple event-driven model:
//!
//! ```text
//! ProtocolEvent → StateMachine::handle() → Vec<Action>
//! ```
//!
//! The state machine is:
//! - **Synchronous**: no async, no `.await`
//! - **Deterministic**: same state + event = same actions
//! - **Pure-ish**: mutates self, but performs no I/O
//!
//! All scheduling is handled by the driver, which delivers events, executes
//! the returned actions (network sends, timers), and records trace events.

mod action;
mod error;
mod event;
mod trace;
mod traits;

pub use action::Action;
pub use error::ProtocolViolation;
pub use event::ProtocolEvent;
pub use trace::{TraceEvent, TraceKind};
pub use traits::StateMachine;
