//! Output actions from the replica state machine.

use crate::TraceEvent;
use hotstuff_types::{Message, ReplicaId, ViewNumber};
use std::time::Duration;

/// All possible outputs from a replica.
///
/// The driver executes actions in the order returned: sends go through the
/// simulated network (which may drop or delay them), timer operations go
/// into the deterministic event queue, and trace events are appended to the
/// run's trace.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send a message to a single replica.
    Send { to: ReplicaId, message: Message },

    /// Send a message to every replica, the sender included. The network
    /// expands this into N point-to-point sends with independent latency
    /// samples; self-delivery is immediate.
    Broadcast { message: Message },

    /// Arm the pacemaker timer for `view`, firing after `duration`.
    SetTimer { view: ViewNumber, duration: Duration },

    /// Cancel all outstanding timers for views strictly below `view`.
    CancelTimersBelow { view: ViewNumber },

    /// Record an observable transition.
    Emit(TraceEvent),
}
