//! Delivery decisions: partitions, packet loss, latency sampling.

use hotstuff_types::ReplicaId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::trace;

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base one-way latency for every edge.
    pub base_latency: Duration,
    /// Uniform jitter applied around the base latency (± this much).
    pub jitter: Duration,
    /// Packet loss rate (0.0 - 1.0). Messages are dropped with this probability.
    pub drop_probability: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_latency: Duration::from_millis(50),
            jitter: Duration::from_millis(10),
            drop_probability: 0.0,
        }
    }
}

/// Simulated network for deterministic message delivery.
///
/// Supports:
/// - Configurable latency with jitter
/// - Packet loss (probabilistic message drops)
/// - Network partitions (blocking communication between replica pairs)
///
/// Self-delivery is special-cased: immediate, never dropped, and never
/// consuming the PRNG.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    /// Partitioned pairs. If (a, b) is in this set, messages from a to b are
    /// dropped. Partitions are directional — both (a, b) and (b, a) make a
    /// bidirectional partition.
    partitions: HashSet<(ReplicaId, ReplicaId)>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            partitions: HashSet::new(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    // ─── Partition Management ───

    /// Check if a message from `from` to `to` would be dropped by a partition.
    pub fn is_partitioned(&self, from: ReplicaId, to: ReplicaId) -> bool {
        self.partitions.contains(&(from, to))
    }

    /// Create a unidirectional partition: messages from `from` to `to` are dropped.
    pub fn partition_unidirectional(&mut self, from: ReplicaId, to: ReplicaId) {
        self.partitions.insert((from, to));
    }

    /// Create a bidirectional partition between two replicas.
    pub fn partition_bidirectional(&mut self, a: ReplicaId, b: ReplicaId) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    /// Partition two groups from each other, both directions.
    pub fn partition_groups(&mut self, group_a: &[ReplicaId], group_b: &[ReplicaId]) {
        for &a in group_a {
            for &b in group_b {
                self.partitions.insert((a, b));
                self.partitions.insert((b, a));
            }
        }
    }

    /// Isolate a replica from every other replica.
    pub fn isolate_replica(&mut self, replica: ReplicaId, num_replicas: u32) {
        for other in (0..num_replicas).map(ReplicaId) {
            if other != replica {
                self.partitions.insert((replica, other));
                self.partitions.insert((other, replica));
            }
        }
    }

    /// Fully partition the network: no pair communicates.
    pub fn partition_all(&mut self, num_replicas: u32) {
        for a in (0..num_replicas).map(ReplicaId) {
            for b in (0..num_replicas).map(ReplicaId) {
                if a != b {
                    self.partitions.insert((a, b));
                }
            }
        }
    }

    /// Heal a bidirectional partition between two replicas.
    pub fn heal_bidirectional(&mut self, a: ReplicaId, b: ReplicaId) {
        self.partitions.remove(&(a, b));
        self.partitions.remove(&(b, a));
    }

    /// Heal all partitions - restore full connectivity.
    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    /// Number of active directional partition pairs.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    // ─── Packet Loss ───

    /// Sample whether a packet should be dropped. Does not consume the PRNG
    /// when loss is disabled.
    pub fn should_drop_packet(&self, rng: &mut ChaCha8Rng) -> bool {
        self.config.drop_probability > 0.0 && rng.gen::<f64>() < self.config.drop_probability
    }

    pub fn set_drop_probability(&mut self, rate: f64) {
        self.config.drop_probability = rate.clamp(0.0, 1.0);
    }

    pub fn drop_probability(&self) -> f64 {
        self.config.drop_probability
    }

    // ─── Message Delivery Decision ───

    /// Decide the fate of a message from `from` to `to`.
    ///
    /// Returns `None` if it is dropped (partition or packet loss), otherwise
    /// `Some(latency)`. Self-delivery is immediate and never dropped.
    pub fn should_deliver(
        &self,
        from: ReplicaId,
        to: ReplicaId,
        rng: &mut ChaCha8Rng,
    ) -> Option<Duration> {
        if from == to {
            return Some(Duration::ZERO);
        }

        // Partition first (deterministic, no PRNG).
        if self.is_partitioned(from, to) {
            trace!(%from, %to, "message dropped by partition");
            return None;
        }

        // Packet loss (probabilistic but deterministic with seeded PRNG).
        if self.should_drop_packet(rng) {
            trace!(%from, %to, "message dropped by packet loss");
            return None;
        }

        Some(self.sample_latency(rng))
    }

    /// Sample a one-way latency: `base ± jitter`, uniform, floored at zero.
    pub fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.config.base_latency.as_secs_f64();
        let jitter_range = self.config.jitter.as_secs_f64();
        if jitter_range <= 0.0 {
            return self.config.base_latency;
        }
        let jitter = rng.gen_range(-jitter_range..jitter_range);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }
}
