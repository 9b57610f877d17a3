//! Input events for the replica state machine.

use hotstuff_types::{Message, ReplicaId, ViewNumber};

/// All possible inputs a replica can receive.
///
/// Events are passive data — they describe something that happened. The
/// state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// A message arrived from another replica (or from the replica itself,
    /// via immediate self-delivery of its own broadcasts).
    MessageReceived { sender: ReplicaId, message: Message },

    /// The pacemaker timer armed for `view` expired.
    ///
    /// Timers carry the view they were scheduled for; a timer that outlives
    /// its view must be a no-op on dispatch.
    TimeoutFired { view: ViewNumber },
}

impl ProtocolEvent {
    /// Get the event type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            ProtocolEvent::MessageReceived { .. } => "MessageReceived",
            ProtocolEvent::TimeoutFired { .. } => "TimeoutFired",
        }
    }
}
