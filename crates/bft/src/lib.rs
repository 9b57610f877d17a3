//! HotStuff consensus state machine.
//!
//! This crate implements the per-replica protocol logic as a synchronous,
//! event-driven state machine:
//!
//! - [`Replica`]: the HotStuff phase loop (basic and chained modes)
//! - [`SafetyRules`]: the `safeNode` voting predicate
//! - [`VoteCollector`]: per-leader vote aggregation into QCs
//! - [`BaselinePacemaker`] / [`AdaptivePacemaker`]: view synchronization
//! - [`leader_of`]: the round-robin leader schedule
//!
//! The replica performs no I/O and holds no clock of its own; the simulation
//! driver feeds it events and executes the actions it returns.

mod block_store;
mod config;
mod leader;
mod pacemaker;
mod replica;
mod safety;
mod vote_collector;

pub use block_store::BlockStore;
pub use config::ReplicaConfig;
pub use leader::{is_leader, leader_of};
pub use pacemaker::{AdaptivePacemaker, BaselinePacemaker, Pacemaker, PacemakerConfig};
pub use replica::Replica;
pub use safety::SafetyRules;
pub use vote_collector::VoteCollector;
