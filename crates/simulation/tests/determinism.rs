//! Tests for deterministic simulation.
//!
//! These verify the core property the simulator is built around: two runs
//! with identical (config, seed) produce byte-identical trace event
//! sequences, and replays reproduce them.

use hotstuff_simulation::{SimConfig, SimulationDriver};
use hotstuff_types::{FaultType, PacemakerKind};

/// A quick configuration: low latency with real jitter, so the PRNG
/// actually shapes the schedule.
fn test_config(seed: u64) -> SimConfig {
    SimConfig {
        num_replicas: 4,
        num_faulty: 0,
        network_latency_ms: 5,
        network_jitter_ms: 2,
        base_timeout_ms: 200,
        max_views: 8,
        seed,
        ..Default::default()
    }
}

fn run_to_end(config: SimConfig) -> SimulationDriver {
    let mut driver = SimulationDriver::new(config);
    driver.start();
    driver.run(500_000).expect("no protocol violation");
    assert!(!driver.is_running(), "run should terminate on its own");
    driver
}

fn trace_json(driver: &SimulationDriver) -> String {
    serde_json::to_string(driver.trace()).expect("trace serializes")
}

#[test]
fn test_same_seed_produces_identical_traces() {
    let run1 = run_to_end(test_config(12345));
    let run2 = run_to_end(test_config(12345));

    assert_eq!(
        trace_json(&run1),
        trace_json(&run2),
        "same (config, seed) must produce byte-identical traces"
    );
    assert_eq!(run1.stats(), run2.stats());
    assert_eq!(run1.metrics_summary(), run2.metrics_summary());
}

#[test]
fn test_different_seeds_diverge() {
    let run1 = run_to_end(test_config(111));
    let run2 = run_to_end(test_config(222));

    // With jitter enabled, different latency samples reshape the schedule.
    assert_ne!(trace_json(&run1), trace_json(&run2));
}

#[test]
fn test_reset_replays_identically() {
    let config = test_config(999);

    let mut driver = SimulationDriver::new(config.clone());
    driver.start();
    driver.run(500_000).unwrap();
    let first = trace_json(&driver);

    driver.reset(config);
    driver.start();
    driver.run(500_000).unwrap();
    let second = trace_json(&driver);

    assert_eq!(first, second, "reset must reproduce the run exactly");
}

#[test]
fn test_determinism_with_random_drop_fault() {
    let config = SimConfig {
        num_faulty: 1,
        fault_type: FaultType::RandomDrop,
        fault_drop_probability: 0.5,
        ..test_config(77)
    };

    let run1 = run_to_end(config.clone());
    let run2 = run_to_end(config);
    assert_eq!(trace_json(&run1), trace_json(&run2));
    assert_eq!(run1.stats().messages_dropped_fault, run2.stats().messages_dropped_fault);
}

#[test]
fn test_determinism_with_adaptive_pacemaker_and_loss() {
    let config = SimConfig {
        pacemaker_type: PacemakerKind::Adaptive,
        drop_probability: 0.1,
        num_faulty: 1,
        ..test_config(31)
    };

    let run1 = run_to_end(config.clone());
    let run2 = run_to_end(config);
    assert_eq!(trace_json(&run1), trace_json(&run2));
}

#[test]
fn test_step_wise_equals_batch_run() {
    let config = test_config(4242);

    let batch = run_to_end(config.clone());

    let mut stepped = SimulationDriver::new(config);
    stepped.start();
    while stepped.is_running() {
        stepped.step().unwrap();
    }

    assert_eq!(trace_json(&batch), trace_json(&stepped));
}
