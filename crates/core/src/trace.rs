//! Trace event schema.
//!
//! Every observable transition in a run is recorded as a [`TraceEvent`].
//! The serialized form is the external contract consumed by the dashboard,
//! the metrics collector, and the benchmark harness: a flat JSON object with
//! a `timestamp` (milliseconds of simulated time), a `type` discriminant,
//! and type-specific payload fields.

use hotstuff_types::{BlockHash, Phase, ReplicaId, ViewNumber};
use serde::Serialize;
use std::time::Duration;

/// One observable transition in a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    /// Simulated time of the transition, in milliseconds.
    pub timestamp: u64,

    #[serde(flatten)]
    pub kind: TraceKind,
}

impl TraceEvent {
    pub fn new(now: Duration, kind: TraceKind) -> Self {
        Self {
            timestamp: now.as_millis() as u64,
            kind,
        }
    }
}

/// The type-specific payload of a trace event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum TraceKind {
    #[serde(rename = "MESSAGE_SEND")]
    MessageSend {
        sender_id: ReplicaId,
        recipient_id: ReplicaId,
        message_type: &'static str,
        view: ViewNumber,
    },

    #[serde(rename = "MESSAGE_RECEIVE")]
    MessageReceive {
        sender_id: ReplicaId,
        recipient_id: ReplicaId,
        message_type: &'static str,
        view: ViewNumber,
    },

    /// A message that never reached its recipient: network loss, partition,
    /// or a malformed message discarded on receipt.
    #[serde(rename = "MESSAGE_DROP")]
    MessageDrop {
        sender_id: ReplicaId,
        recipient_id: ReplicaId,
        message_type: &'static str,
        reason: &'static str,
    },

    #[serde(rename = "VOTE_SEND")]
    VoteSend {
        replica_id: ReplicaId,
        vote_type: Phase,
        view: ViewNumber,
        block_hash: BlockHash,
    },

    #[serde(rename = "QC_FORMATION")]
    QcFormation {
        replica_id: ReplicaId,
        qc_type: Phase,
        view: ViewNumber,
        block_hash: BlockHash,
    },

    #[serde(rename = "PROPOSAL")]
    Proposal {
        replica_id: ReplicaId,
        view: ViewNumber,
        block_hash: BlockHash,
    },

    #[serde(rename = "LOCK_UPDATE")]
    LockUpdate {
        replica_id: ReplicaId,
        locked_view: ViewNumber,
        block_hash: BlockHash,
    },

    #[serde(rename = "COMMIT")]
    Commit {
        replica_id: ReplicaId,
        height: u64,
        block_hash: BlockHash,
        latency_ms: u64,
    },

    #[serde(rename = "TIMEOUT")]
    Timeout {
        replica_id: ReplicaId,
        view: ViewNumber,
    },

    #[serde(rename = "VIEW_CHANGE")]
    ViewChange {
        replica_id: ReplicaId,
        new_view: ViewNumber,
    },

    #[serde(rename = "BYZANTINE_ACTION")]
    ByzantineAction {
        replica_id: ReplicaId,
        action: String,
    },
}

impl TraceKind {
    /// The `type` discriminant, as serialized.
    pub fn type_name(&self) -> &'static str {
        match self {
            TraceKind::MessageSend { .. } => "MESSAGE_SEND",
            TraceKind::MessageReceive { .. } => "MESSAGE_RECEIVE",
            TraceKind::MessageDrop { .. } => "MESSAGE_DROP",
            TraceKind::VoteSend { .. } => "VOTE_SEND",
            TraceKind::QcFormation { .. } => "QC_FORMATION",
            TraceKind::Proposal { .. } => "PROPOSAL",
            TraceKind::LockUpdate { .. } => "LOCK_UPDATE",
            TraceKind::Commit { .. } => "COMMIT",
            TraceKind::Timeout { .. } => "TIMEOUT",
            TraceKind::ViewChange { .. } => "VIEW_CHANGE",
            TraceKind::ByzantineAction { .. } => "BYZANTINE_ACTION",
        }
    }
}
