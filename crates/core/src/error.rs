//! Protocol violation error.

use hotstuff_types::{ReplicaId, ViewNumber};

/// A non-faulty replica was driven into a state that breaks safety.
///
/// This is never a tolerated fault: tolerated misbehavior is data (recorded
/// as `BYZANTINE_ACTION`), whereas a violation means the implementation
/// itself is wrong. The driver aborts the run and flushes the trace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("protocol violation at replica {replica}, view {view}: {detail}")]
pub struct ProtocolViolation {
    /// The replica whose invariant broke.
    pub replica: ReplicaId,
    /// The view in which the violation was detected.
    pub view: ViewNumber,
    /// What broke.
    pub detail: String,
}

impl ProtocolViolation {
    pub fn new(replica: ReplicaId, view: ViewNumber, detail: impl Into<String>) -> Self {
        Self {
            replica,
            view,
            detail: detail.into(),
        }
    }
}
