//! Driver API response types.
//!
//! These are the serializable contract consumed by the HTTP server and CLI,
//! which live outside the core.

use hotstuff_bft::{is_leader, Replica};
use hotstuff_types::{FaultType, Phase, QuorumCertificate, ReplicaId, ViewNumber};
use serde::Serialize;

/// `GET status` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub is_running: bool,
    pub is_paused: bool,
    /// Current simulated time in milliseconds.
    pub current_time: u64,
    /// Highest view any live replica has reached.
    pub current_view: ViewNumber,
}

/// One entry of the `GET replicas` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicaStatus {
    pub replica_id: ReplicaId,
    pub current_view: ViewNumber,
    pub current_phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_qc: Option<QuorumCertificate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepare_qc: Option<QuorumCertificate>,
    pub committed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_voted_view: Option<ViewNumber>,
    pub is_leader: bool,
    pub is_faulty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_type: Option<FaultType>,
}

impl ReplicaStatus {
    pub fn snapshot(replica: &Replica, num_replicas: u32) -> Self {
        Self {
            replica_id: replica.id(),
            current_view: replica.current_view(),
            current_phase: replica.current_phase(),
            locked_qc: replica.locked_qc().cloned(),
            prepare_qc: replica.prepare_qc().cloned(),
            committed_count: replica.committed_count(),
            last_voted_view: replica.last_voted_view(),
            is_leader: is_leader(replica.id(), replica.current_view(), num_replicas),
            is_faulty: replica.is_faulty(),
            fault_type: replica.is_faulty().then(|| replica.fault()),
        }
    }
}

/// One in-flight message, for the network inspection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlightMessage {
    pub sender_id: ReplicaId,
    pub recipient_id: ReplicaId,
    pub message_type: &'static str,
    pub send_time_ms: u64,
    pub deliver_time_ms: u64,
}
