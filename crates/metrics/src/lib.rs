//! Metrics collection for simulation runs.
//!
//! The collector folds the trace event stream into summary metrics:
//! committed blocks, timeouts, view changes, commit latency distribution,
//! and throughput. Latency is measured from a block's first `PROPOSAL`
//! event to each `COMMIT` of that block.
//!
//! [`MetricsSummary`] serializes to JSON for the dashboard and the
//! benchmark harness.

use hotstuff_core::{TraceEvent, TraceKind};
use hotstuff_types::BlockHash;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Aggregated metrics for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_blocks_committed: usize,
    pub total_timeouts: usize,
    pub view_change_count: usize,
    pub average_commit_latency_ms: f64,
    pub throughput_blocks_per_second: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub simulation_duration_ms: u64,
}

/// Collects and aggregates metrics from trace events.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    proposal_times: HashMap<BlockHash, u64>,
    committed_blocks: HashSet<BlockHash>,
    commit_latencies: Vec<u64>,
    timeouts: usize,
    view_changes: usize,
    start_time: u64,
    end_time: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one trace event into the running aggregates.
    pub fn record(&mut self, event: &TraceEvent) {
        match &event.kind {
            TraceKind::Proposal { block_hash, .. } => {
                self.proposal_times
                    .entry(*block_hash)
                    .or_insert(event.timestamp);
            }
            TraceKind::Commit { block_hash, .. } => {
                self.committed_blocks.insert(*block_hash);
                if let Some(proposed) = self.proposal_times.get(block_hash) {
                    self.commit_latencies
                        .push(event.timestamp.saturating_sub(*proposed));
                }
            }
            TraceKind::Timeout { .. } => self.timeouts += 1,
            TraceKind::ViewChange { .. } => self.view_changes += 1,
            _ => {}
        }

        if event.timestamp > self.end_time {
            self.end_time = event.timestamp;
        }
    }

    /// Summarize everything recorded so far.
    pub fn summary(&self) -> MetricsSummary {
        let duration_ms = self.end_time.saturating_sub(self.start_time).max(1);
        let duration_secs = duration_ms as f64 / 1000.0;

        let total_commits = self.committed_blocks.len();
        let throughput = total_commits as f64 / duration_secs;

        let mut sorted = self.commit_latencies.clone();
        sorted.sort_unstable();

        let average = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        MetricsSummary {
            total_blocks_committed: total_commits,
            total_timeouts: self.timeouts,
            view_change_count: self.view_changes,
            average_commit_latency_ms: average,
            throughput_blocks_per_second: throughput,
            p50_latency_ms: percentile(&sorted, 50.0),
            p95_latency_ms: percentile(&sorted, 95.0),
            p99_latency_ms: percentile(&sorted, 99.0),
            simulation_duration_ms: duration_ms,
        }
    }

    /// Export the summary as pretty-printed JSON.
    pub fn export_json_string(&self) -> String {
        serde_json::to_string_pretty(&self.summary())
            .expect("summary serialization cannot fail")
    }

    pub fn set_start_time(&mut self, time_ms: u64) {
        self.start_time = time_ms;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Linear-interpolated percentile over sorted data.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let k = (sorted.len() - 1) as f64 * pct / 100.0;
    let floor = k.floor() as usize;
    let ceil = (floor + 1).min(sorted.len() - 1);
    sorted[floor] as f64 + (k - floor as f64) * (sorted[ceil] as f64 - sorted[floor] as f64)
}
