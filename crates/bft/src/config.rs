//! Replica configuration.

/// Per-replica protocol parameters, identical across a run.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Total number of replicas (N).
    pub num_replicas: u32,

    /// Votes required to form a QC. Safe while the number of faulty
    /// replicas stays at or below `max_faulty()`.
    pub quorum_size: usize,

    /// Run the chained (pipelined) protocol instead of the basic
    /// four-phase loop.
    pub chained: bool,
}

impl ReplicaConfig {
    /// Maximum number of faulty replicas the protocol tolerates: ⌊(N−1)/3⌋.
    pub fn max_faulty(&self) -> u32 {
        (self.num_replicas - 1) / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_faulty() {
        let config = |n| ReplicaConfig {
            num_replicas: n,
            quorum_size: 0,
            chained: false,
        };
        assert_eq!(config(1).max_faulty(), 0);
        assert_eq!(config(4).max_faulty(), 1);
        assert_eq!(config(7).max_faulty(), 2);
        assert_eq!(config(10).max_faulty(), 3);
    }
}
