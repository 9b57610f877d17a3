//! Simulated network with deterministic latency, packet loss, and partitions.
//!
//! The network never delivers anything itself: the driver asks
//! [`SimulatedNetwork::should_deliver`] for a verdict and schedules the
//! delivery event (or records the drop). All randomness flows through the
//! driver's seeded PRNG, consumed in a fixed order, so runs with the same
//! seed are bit-reproducible.

mod network;

pub use network::{NetworkConfig, SimulatedNetwork};
