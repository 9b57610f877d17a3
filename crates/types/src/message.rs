//! Protocol messages and the network scheduling envelope.

use crate::{Block, BlockHash, Phase, QuorumCertificate, ReplicaId, ViewNumber};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A protocol message exchanged between replicas.
///
/// The receiver matches exhaustively; there is no unknown-variant path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Leader-driven phase message. The same variant carries all four phases:
    /// a Prepare proposal justifies with the high QC, later phases justify
    /// with the QC formed in the preceding phase.
    Proposal {
        phase: Phase,
        block: Block,
        justify: QuorumCertificate,
    },

    /// A replica's vote, addressed to the leader of `view`.
    Vote {
        phase: Phase,
        view: ViewNumber,
        block_hash: BlockHash,
        voter: ReplicaId,
    },

    /// Sent to the leader of `view` on entering it, carrying the sender's
    /// highest known QC.
    NewView {
        view: ViewNumber,
        highest_qc: QuorumCertificate,
    },

    /// View-synchronization hint: the voter's pacemaker expired in `view`.
    /// A replica that observes `f + 1` distinct timeouts for a view ahead of
    /// its own jumps forward without waiting for its own timer.
    Timeout { view: ViewNumber, voter: ReplicaId },
}

impl Message {
    /// Wire/trace name, matching the phase vocabulary of the trace schema.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Proposal { phase, .. } => phase.name(),
            Message::Vote { phase, .. } => match phase {
                Phase::Prepare => "PREPARE_VOTE",
                Phase::PreCommit => "PRE_COMMIT_VOTE",
                Phase::Commit => "COMMIT_VOTE",
                Phase::Decide => "DECIDE_VOTE",
                Phase::NewView => "NEW_VIEW_VOTE",
            },
            Message::NewView { .. } => "NEW_VIEW",
            Message::Timeout { .. } => "TIMEOUT",
        }
    }

    /// The view this message belongs to.
    pub fn view(&self) -> ViewNumber {
        match self {
            Message::Proposal { block, .. } => block.view,
            Message::Vote { view, .. } => *view,
            Message::NewView { view, .. } => *view,
            Message::Timeout { view, .. } => *view,
        }
    }
}

/// An in-flight message: the unit of network scheduling.
///
/// Envelopes exist from `send` until delivery or drop. Dropped envelopes are
/// recorded in the trace but never delivered.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Simulation time the message was sent.
    pub send_time: Duration,
    /// Simulation time the message will be (or would have been) delivered.
    pub deliver_time: Duration,
    /// Sending replica.
    pub sender: ReplicaId,
    /// Receiving replica.
    pub recipient: ReplicaId,
    /// The message payload.
    pub message: Message,
    /// Whether the network dropped this envelope.
    pub dropped: bool,
}
