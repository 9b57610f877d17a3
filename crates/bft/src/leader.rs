//! Round-robin leader schedule.

use hotstuff_types::{ReplicaId, ViewNumber};

/// Get the leader for a view: `leader(view) = view mod n`.
///
/// Deterministic and stateless; every replica computes the same schedule.
pub fn leader_of(view: ViewNumber, num_replicas: u32) -> ReplicaId {
    ReplicaId((view.0 % num_replicas as u64) as u32)
}

/// Check if a replica leads a view.
pub fn is_leader(replica: ReplicaId, view: ViewNumber, num_replicas: u32) -> bool {
    leader_of(view, num_replicas) == replica
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_rotation() {
        assert_eq!(leader_of(ViewNumber(0), 4), ReplicaId(0));
        assert_eq!(leader_of(ViewNumber(1), 4), ReplicaId(1));
        assert_eq!(leader_of(ViewNumber(3), 4), ReplicaId(3));
        assert_eq!(leader_of(ViewNumber(4), 4), ReplicaId(0));
        assert_eq!(leader_of(ViewNumber(7), 4), ReplicaId(3));
    }

    #[test]
    fn test_single_replica_always_leads() {
        for v in 0..10 {
            assert_eq!(leader_of(ViewNumber(v), 1), ReplicaId(0));
        }
    }

    #[test]
    fn test_is_leader() {
        assert!(is_leader(ReplicaId(2), ViewNumber(6), 4));
        assert!(!is_leader(ReplicaId(3), ViewNumber(6), 4));
    }
}
