//! Core trait for replica state machines.

use crate::{Action, ProtocolEvent, ProtocolViolation};
use std::time::Duration;

/// A state machine that processes events.
///
/// This is the core abstraction of the simulator. All consensus logic is
/// implemented as state machines that are:
///
/// - **Synchronous**: no async, no `.await`
/// - **Deterministic**: same state + event = same actions
/// - **Pure-ish**: mutate self, but perform no I/O
pub trait StateMachine {
    /// Process a protocol event, returning actions to perform.
    ///
    /// The only error path is [`ProtocolViolation`]: the replica's own logic
    /// would have to break a safety invariant. Tolerated faults never
    /// surface here — faulty-replica behavior is data, not an error.
    fn handle(&mut self, event: ProtocolEvent) -> Result<Vec<Action>, ProtocolViolation>;

    /// Set the current simulated time.
    ///
    /// Called by the driver before each `handle()` call.
    fn set_time(&mut self, now: Duration);

    /// Get the time last set via `set_time()`.
    fn now(&self) -> Duration;
}
