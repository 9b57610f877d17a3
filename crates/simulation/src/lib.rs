//! Deterministic simulation driver for HotStuff consensus.
//!
//! This crate composes the replicas, the simulated network, and the event
//! queue into a reproducible discrete-event simulation. Given the same
//! configuration and seed, it produces identical results every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationDriver                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     EventQueue (BTreeMap<EventKey, SimEvent>)      │ │
//! │  │     Ordered by: (time, insertion sequence)         │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     replicas: Vec<Replica>                         │ │
//! │  │     Each processes events sequentially             │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Actions → network / timers / trace events      │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The core is single-threaded and cooperative: all apparent concurrency is
//! interleaving in the queue, and the only suspension point is between
//! consecutive event dispatches.

mod api;
mod config;
mod event_queue;
mod runner;

pub use api::{InFlightMessage, ReplicaStatus, StatusResponse};
pub use config::{ConfigError, ConfigSummary, SimConfig};
pub use event_queue::{EventKey, EventQueue, SimEvent};
pub use runner::{SimulationDriver, SimulationStats};
