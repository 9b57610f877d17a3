//! Concrete end-to-end scenarios.
//!
//! Each test pins a full configuration (including seed) and checks the
//! precise schedule the protocol should produce: commit heights, proposal
//! and QC counts, timeout behavior, and boundary conditions.

use hotstuff_bft::Pacemaker;
use hotstuff_core::{TraceEvent, TraceKind};
use hotstuff_simulation::{ConfigError, SimConfig, SimulationDriver};
use hotstuff_types::{FaultType, PacemakerKind, ReplicaId, ViewNumber};
use std::time::Duration;
use tracing_test::traced_test;

fn run_to_end(mut driver: SimulationDriver) -> SimulationDriver {
    driver.start();
    driver.run(500_000).expect("no protocol violation");
    assert!(!driver.is_running(), "run should terminate on its own");
    driver
}

fn count_kind(trace: &[TraceEvent], name: &str) -> usize {
    trace
        .iter()
        .filter(|e| e.kind.type_name() == name)
        .count()
}

/// N=4, f=0, baseline Δ=100ms, seed=42, max_views=3: three commits at
/// heights 1..3, one proposal and three QC formations per view, no timeouts.
#[test]
fn test_healthy_run_commits_every_view() {
    let driver = run_to_end(SimulationDriver::new(SimConfig {
        num_replicas: 4,
        num_faulty: 0,
        base_timeout_ms: 100,
        network_latency_ms: 5,
        network_jitter_ms: 0,
        seed: 42,
        max_views: 3,
        ..Default::default()
    }));

    let trace = driver.trace();
    assert_eq!(count_kind(trace, "TIMEOUT"), 0, "no view should time out");
    assert_eq!(count_kind(trace, "PROPOSAL"), 3, "one proposal per view");
    assert_eq!(
        count_kind(trace, "QC_FORMATION"),
        9,
        "prepare, pre-commit, and commit QC per view"
    );

    // Every replica committed heights 1, 2, 3 — the same blocks.
    let reference: Vec<_> = driver
        .replica(ReplicaId(0))
        .unwrap()
        .committed_chain()
        .to_vec();
    assert_eq!(reference.len(), 3);
    for id in 0..4 {
        let replica = driver.replica(ReplicaId(id)).unwrap();
        assert_eq!(replica.committed_height(), 3, "replica {id}");
        assert_eq!(replica.committed_chain(), reference.as_slice());
    }
    assert_eq!(driver.metrics_summary().total_blocks_committed, 3);
}

/// N=4 with replica 0 crashed: the view it leads times out, the others
/// view-change past it, and commits resume under the next honest leader.
#[traced_test]
#[test]
fn test_crashed_leader_view_times_out_and_recovers() {
    let mut driver = SimulationDriver::new(SimConfig {
        num_replicas: 4,
        num_faulty: 1,
        base_timeout_ms: 100,
        network_latency_ms: 5,
        network_jitter_ms: 0,
        seed: 42,
        max_views: 6,
        ..Default::default()
    });
    driver.inject_fault(ReplicaId(0), FaultType::Crash);
    let driver = run_to_end(driver);

    let trace = driver.trace();
    // Replica 0 leads view 4; the honest replicas time out of it.
    let timeouts_in_view_4 = trace
        .iter()
        .filter(|e| matches!(e.kind, TraceKind::Timeout { view: ViewNumber(4), .. }))
        .count();
    assert!(timeouts_in_view_4 >= 1, "the crashed leader's view times out");
    assert!(trace.iter().any(
        |e| matches!(e.kind, TraceKind::ViewChange { new_view: ViewNumber(5), .. })
    ));

    // Views 1-3 commit, view 4 stalls, views 5-6 commit again.
    assert!(
        driver.metrics_summary().total_blocks_committed >= 4,
        "commits resume after the view change"
    );
    for id in 1..4 {
        assert!(
            driver.replica(ReplicaId(id)).unwrap().committed_height() >= 4,
            "honest replica {id} should pass the stalled view"
        );
    }
    assert_eq!(
        driver.replica(ReplicaId(0)).unwrap().committed_count(),
        0,
        "the crashed replica commits nothing"
    );
}

/// N=7 with one RANDOM_DROP replica and the adaptive pacemaker: the EMA
/// converges near the observed commit latency and throughput stays high.
#[test]
fn test_adaptive_pacemaker_converges_under_faults() {
    let driver = run_to_end(SimulationDriver::new(SimConfig {
        num_replicas: 7,
        num_faulty: 1,
        fault_type: FaultType::RandomDrop,
        fault_drop_probability: 0.3,
        pacemaker_type: PacemakerKind::Adaptive,
        adaptive_alpha: 0.3,
        adaptive_k: 3.0,
        adaptive_min_timeout_ms: 50,
        base_timeout_ms: 1000,
        network_latency_ms: 10,
        network_jitter_ms: 2,
        seed: 7,
        max_views: 20,
        ..Default::default()
    }));

    assert!(
        driver.metrics_summary().total_blocks_committed >= 15,
        "expected at least 15 commits in 20 views, got {}",
        driver.metrics_summary().total_blocks_committed
    );

    // An honest replica's timeout has converged to roughly k × the commit
    // latency it observes (a handful of 10ms hops), far below the 1s base.
    let timeout = driver
        .replica(ReplicaId(0))
        .unwrap()
        .pacemaker()
        .current_timeout();
    assert!(
        timeout >= Duration::from_millis(100) && timeout <= Duration::from_millis(600),
        "adaptive timeout should track observed latency, got {timeout:?}"
    );
}

/// N=4 with two crashed replicas: the quorum of 3 is unreachable, nothing
/// commits, and views advance one timeout at a time.
#[test]
fn test_over_faulted_network_stalls_but_does_not_crash() {
    let config = SimConfig {
        num_replicas: 4,
        num_faulty: 2,
        fault_type: FaultType::Crash,
        base_timeout_ms: 100,
        network_latency_ms: 5,
        network_jitter_ms: 0,
        seed: 1,
        max_views: 6,
        ..Default::default()
    };

    // The strict config contract rejects f beyond (N−1)/3...
    assert!(matches!(
        config.validate(),
        Err(ConfigError::TooManyFaulty { .. })
    ));

    // ...but the simulation still runs the experiment.
    let driver = run_to_end(SimulationDriver::new(config));

    assert_eq!(driver.metrics_summary().total_blocks_committed, 0);
    assert_eq!(count_kind(driver.trace(), "COMMIT"), 0);

    // Both live replicas marched through every view on timeouts alone.
    for id in 0..2 {
        let replica = driver.replica(ReplicaId(id)).unwrap();
        assert!(replica.current_view() > ViewNumber(6), "replica {id}");
    }
    assert!(driver.metrics_summary().total_timeouts >= 6);
}

/// Chained mode: one proposal per view, commits start once the first
/// three-chain completes (view 3), and heights 1..4 are committed by the
/// time view 6 finishes.
#[test]
fn test_chained_pipeline_commit_schedule() {
    let driver = run_to_end(SimulationDriver::new(SimConfig {
        num_replicas: 4,
        num_faulty: 0,
        chained: true,
        base_timeout_ms: 100,
        network_latency_ms: 5,
        network_jitter_ms: 0,
        seed: 42,
        max_views: 6,
        ..Default::default()
    }));

    let trace = driver.trace();
    assert_eq!(count_kind(trace, "TIMEOUT"), 0);
    assert_eq!(count_kind(trace, "PROPOSAL"), 6, "one proposal per view");

    // The first commit anywhere is height 1, produced by the three-chain
    // over views 1-3.
    let first_commit = trace
        .iter()
        .find_map(|e| match &e.kind {
            TraceKind::Commit { height, .. } => Some(*height),
            _ => None,
        })
        .expect("chained run should commit");
    assert_eq!(first_commit, 1);

    // Heights 1..4 are committed everywhere: view v's QC decides view v−2.
    for id in 0..4 {
        let replica = driver.replica(ReplicaId(id)).unwrap();
        assert_eq!(replica.committed_height(), 4, "replica {id}");
    }
    assert_eq!(driver.metrics_summary().total_blocks_committed, 4);
}

/// Determinism replay of the healthy scenario: the trace diff is empty.
#[test]
fn test_healthy_scenario_replays_identically() {
    let config = SimConfig {
        num_replicas: 4,
        num_faulty: 0,
        base_timeout_ms: 100,
        network_latency_ms: 5,
        network_jitter_ms: 0,
        seed: 42,
        max_views: 3,
        ..Default::default()
    };

    let run1 = run_to_end(SimulationDriver::new(config.clone()));
    let run2 = run_to_end(SimulationDriver::new(config));

    let json1 = serde_json::to_string(run1.trace()).unwrap();
    let json2 = serde_json::to_string(run2.trace()).unwrap();
    assert_eq!(json1, json2);
}

// ═══════════════════════════════════════════════════════════════════════════
// Boundary behaviors
// ═══════════════════════════════════════════════════════════════════════════

/// N=1: the single replica is always leader, quorum is 1, and every view
/// commits instantly through self-delivery.
#[test]
fn test_single_replica_commits_instantly() {
    let driver = run_to_end(SimulationDriver::new(SimConfig {
        num_replicas: 1,
        num_faulty: 0,
        base_timeout_ms: 100,
        network_latency_ms: 5,
        network_jitter_ms: 0,
        seed: 42,
        max_views: 5,
        ..Default::default()
    }));

    assert_eq!(count_kind(driver.trace(), "TIMEOUT"), 0);
    assert_eq!(
        driver.replica(ReplicaId(0)).unwrap().committed_height(),
        5,
        "one commit per view"
    );
    // All progress happened at simulated time zero: self-delivery is free.
    assert_eq!(driver.metrics_summary().average_commit_latency_ms, 0.0);
}

/// Fully partitioned network: no commits, monotone view changes, and the
/// adaptive timeout backs off until it plateaus at its ceiling.
#[traced_test]
#[test]
fn test_full_partition_starves_consensus() {
    let mut driver = SimulationDriver::new(SimConfig {
        num_replicas: 4,
        num_faulty: 0,
        pacemaker_type: PacemakerKind::Adaptive,
        base_timeout_ms: 1000,
        adaptive_max_timeout_ms: 5000,
        network_latency_ms: 5,
        network_jitter_ms: 0,
        seed: 3,
        max_views: 12,
        ..Default::default()
    });
    driver.network_mut().partition_all(4);
    let driver = run_to_end(driver);

    assert_eq!(count_kind(driver.trace(), "COMMIT"), 0);

    // View changes are strictly monotone per replica.
    let mut last_view: Vec<u64> = vec![0; 4];
    for event in driver.trace() {
        if let TraceKind::ViewChange {
            replica_id,
            new_view,
        } = &event.kind
        {
            let slot = &mut last_view[replica_id.as_usize()];
            assert!(new_view.0 > *slot, "view change must move forward");
            *slot = new_view.0;
        }
    }

    // Backoff reached the ceiling and stayed there.
    for id in 0..4 {
        assert_eq!(
            driver
                .replica(ReplicaId(id))
                .unwrap()
                .pacemaker()
                .current_timeout(),
            Duration::from_millis(5000),
            "replica {id} timeout should plateau at the maximum"
        );
    }
}
