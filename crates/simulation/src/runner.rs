//! Deterministic simulation driver.
//!
//! Owns the clock, the event queue, the network, every replica, and the
//! trace. Pops the earliest event, dispatches it to the target replica, and
//! executes the actions that come back. Given the same config and seed, a
//! run is bit-reproducible.

use crate::api::{InFlightMessage, ReplicaStatus, StatusResponse};
use crate::event_queue::{EventQueue, SimEvent};
use crate::SimConfig;
use hotstuff_bft::{
    AdaptivePacemaker, BaselinePacemaker, Pacemaker, PacemakerConfig, Replica, ReplicaConfig,
};
use hotstuff_core::{
    Action, ProtocolEvent, ProtocolViolation, StateMachine, TraceEvent, TraceKind,
};
use hotstuff_metrics::{MetricsCollector, MetricsSummary};
use hotstuff_network_memory::{NetworkConfig, SimulatedNetwork};
use hotstuff_types::{Envelope, FaultType, Message, PacemakerKind, ReplicaId, ViewNumber};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Messages scheduled for delivery.
    pub messages_sent: u64,
    /// Messages dropped by packet loss.
    pub messages_dropped_loss: u64,
    /// Messages dropped by partition.
    pub messages_dropped_partition: u64,
    /// Messages dropped by a RANDOM_DROP-faulty sender.
    pub messages_dropped_fault: u64,
    /// Timers armed.
    pub timers_set: u64,
    /// Timers cancelled before firing.
    pub timers_cancelled: u64,
}

impl SimulationStats {
    /// Total messages dropped, all causes.
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_loss + self.messages_dropped_partition + self.messages_dropped_fault
    }

    /// Message delivery rate (sent / (sent + dropped)).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_dropped();
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Deterministic simulation driver.
pub struct SimulationDriver {
    config: SimConfig,
    replicas: Vec<Replica>,
    queue: EventQueue,
    now: Duration,
    network: SimulatedNetwork,
    rng: ChaCha8Rng,
    trace: Vec<TraceEvent>,
    metrics: MetricsCollector,
    stats: SimulationStats,
    started: bool,
    is_running: bool,
    is_paused: bool,
}

impl SimulationDriver {
    // ═══════════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════════

    /// Build a driver from a configuration.
    ///
    /// An over-faulted configuration (f beyond ⌊(N−1)/3⌋) is allowed here —
    /// the strict check lives in [`SimConfig::validate`] — but it forfeits
    /// liveness and possibly safety, so it is loudly logged.
    pub fn new(config: SimConfig) -> Self {
        if !config.is_fault_tolerant() {
            warn!(
                num_faulty = config.num_faulty,
                max_faulty = config.max_faulty(),
                "fault count exceeds the BFT bound; liveness is not guaranteed"
            );
        }

        let network = SimulatedNetwork::new(NetworkConfig {
            base_latency: Duration::from_millis(config.network_latency_ms),
            jitter: Duration::from_millis(config.network_jitter_ms),
            drop_probability: config.drop_probability,
        });
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        let replica_config = ReplicaConfig {
            num_replicas: config.num_replicas,
            quorum_size: config.quorum_size(),
            chained: config.chained,
        };

        let mut replicas: Vec<Replica> = (0..config.num_replicas)
            .map(|i| {
                Replica::new(
                    ReplicaId(i),
                    replica_config.clone(),
                    make_pacemaker(&config),
                )
            })
            .collect();

        // Faults go to the highest-numbered replicas.
        if config.fault_type.is_faulty() {
            let first_faulty = config.num_replicas.saturating_sub(config.num_faulty);
            for replica in replicas.iter_mut().skip(first_faulty as usize) {
                replica.inject_fault(config.fault_type);
            }
        }

        info!(
            num_replicas = config.num_replicas,
            quorum = config.quorum_size(),
            seed = config.seed,
            chained = config.chained,
            "created simulation driver"
        );

        Self {
            config,
            replicas,
            queue: EventQueue::new(),
            now: Duration::ZERO,
            network,
            rng,
            trace: Vec::new(),
            metrics: MetricsCollector::new(),
            stats: SimulationStats::default(),
            started: false,
            is_running: false,
            is_paused: false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Start the simulation: bootstrap every replica into view 1.
    /// Returns the trace events produced by the bootstrap.
    pub fn start(&mut self) -> Vec<TraceEvent> {
        if self.started {
            self.is_paused = false;
            return Vec::new();
        }
        self.started = true;
        self.is_running = true;
        self.metrics.set_start_time(self.now.as_millis() as u64);

        let trace_start = self.trace.len();
        for id in 0..self.replicas.len() {
            self.replicas[id].set_time(self.now);
            let actions = self.replicas[id].start();
            self.execute_actions(ReplicaId(id as u32), actions);
        }
        info!("simulation started");
        self.trace[trace_start..].to_vec()
    }

    /// Pause: `step()` becomes a no-op until resumed.
    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    pub fn resume(&mut self) {
        self.is_paused = false;
    }

    /// Rebuild all state from a configuration and its seed.
    pub fn reset(&mut self, config: SimConfig) {
        *self = SimulationDriver::new(config);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stepping
    // ═══════════════════════════════════════════════════════════════════════

    /// Pop and dispatch one event. Returns the trace events it produced.
    ///
    /// The only error is a [`ProtocolViolation`] — an implementation bug,
    /// not a tolerated fault — which halts the run with the trace intact.
    pub fn step(&mut self) -> Result<Vec<TraceEvent>, ProtocolViolation> {
        if !self.is_running || self.is_paused {
            return Ok(Vec::new());
        }
        if self.reached_max_views() {
            info!(max_views = self.config.max_views, "view limit reached");
            self.is_running = false;
            return Ok(Vec::new());
        }
        let Some((key, event)) = self.queue.pop() else {
            debug!("event queue exhausted");
            self.is_running = false;
            return Ok(Vec::new());
        };

        // Time never moves backward.
        self.now = self.now.max(key.time);
        self.stats.events_processed += 1;
        let trace_start = self.trace.len();

        let (target, protocol_event) = match event {
            SimEvent::Deliver(envelope) => {
                self.record(TraceEvent::new(
                    self.now,
                    TraceKind::MessageReceive {
                        sender_id: envelope.sender,
                        recipient_id: envelope.recipient,
                        message_type: envelope.message.type_name(),
                        view: envelope.message.view(),
                    },
                ));
                (
                    envelope.recipient,
                    ProtocolEvent::MessageReceived {
                        sender: envelope.sender,
                        message: envelope.message,
                    },
                )
            }
            SimEvent::Timeout { replica, view } => {
                (replica, ProtocolEvent::TimeoutFired { view })
            }
        };

        let replica = &mut self.replicas[target.as_usize()];
        replica.set_time(self.now);
        let actions = match replica.handle(protocol_event) {
            Ok(actions) => actions,
            Err(violation) => {
                warn!(%violation, "protocol violation, aborting run");
                self.is_running = false;
                return Err(violation);
            }
        };
        self.execute_actions(target, actions);

        Ok(self.trace[trace_start..].to_vec())
    }

    /// Step until `steps` events are consumed, the queue is empty, or a
    /// terminal condition is reached. Returns all trace events produced.
    pub fn run(&mut self, steps: usize) -> Result<Vec<TraceEvent>, ProtocolViolation> {
        let mut events = Vec::new();
        for _ in 0..steps {
            if !self.is_running || self.is_paused {
                break;
            }
            events.extend(self.step()?);
        }
        Ok(events)
    }

    /// Run until simulated time passes `end_time` or the run terminates.
    pub fn run_until(&mut self, end_time: Duration) -> Result<(), ProtocolViolation> {
        while self.is_running && !self.is_paused {
            match self.queue.peek_time() {
                Some(time) if time <= end_time => {
                    self.step()?;
                }
                _ => break,
            }
        }
        if self.now < end_time {
            self.now = end_time;
        }
        Ok(())
    }

    /// Every live (non-crashed) replica has passed the view limit.
    fn reached_max_views(&self) -> bool {
        self.replicas
            .iter()
            .filter(|r| r.fault() != FaultType::Crash)
            .map(|r| r.current_view().0)
            .min()
            .is_some_and(|lowest| lowest > self.config.max_views)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Action execution
    // ═══════════════════════════════════════════════════════════════════════

    fn execute_actions(&mut self, from: ReplicaId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => self.send(from, to, message),
                Action::Broadcast { message } => {
                    // Expand to N point-to-point sends in replica-id order so
                    // the PRNG stream is consumed deterministically.
                    for to in 0..self.config.num_replicas {
                        self.send(from, ReplicaId(to), message.clone());
                    }
                }
                Action::SetTimer { view, duration } => {
                    self.stats.timers_set += 1;
                    self.queue.push(
                        self.now + duration,
                        SimEvent::Timeout {
                            replica: from,
                            view,
                        },
                    );
                }
                Action::CancelTimersBelow { view } => {
                    self.stats.timers_cancelled +=
                        self.queue.cancel_timers_below(from, view) as u64;
                }
                Action::Emit(event) => self.record(event),
            }
        }
    }

    fn send(&mut self, from: ReplicaId, to: ReplicaId, message: Message) {
        let message_type = message.type_name();

        // A RANDOM_DROP-faulty sender loses each outgoing message with the
        // configured probability. Self-sends are local bookkeeping, not
        // network traffic, and are exempt.
        if from != to
            && self.replicas[from.as_usize()].fault() == FaultType::RandomDrop
            && self.rng.gen::<f64>() < self.config.fault_drop_probability
        {
            self.stats.messages_dropped_fault += 1;
            self.record(TraceEvent::new(
                self.now,
                TraceKind::ByzantineAction {
                    replica_id: from,
                    action: format!("DROPPED_{message_type}"),
                },
            ));
            return;
        }

        match self.network.should_deliver(from, to, &mut self.rng) {
            Some(latency) => {
                self.record(TraceEvent::new(
                    self.now,
                    TraceKind::MessageSend {
                        sender_id: from,
                        recipient_id: to,
                        message_type,
                        view: message.view(),
                    },
                ));
                let deliver_time = self.now + latency;
                let envelope = Envelope {
                    send_time: self.now,
                    deliver_time,
                    sender: from,
                    recipient: to,
                    message,
                    dropped: false,
                };
                self.queue.push(deliver_time, SimEvent::Deliver(envelope));
                self.stats.messages_sent += 1;
            }
            None => {
                let reason = if self.network.is_partitioned(from, to) {
                    self.stats.messages_dropped_partition += 1;
                    "partition"
                } else {
                    self.stats.messages_dropped_loss += 1;
                    "loss"
                };
                self.record(TraceEvent::new(
                    self.now,
                    TraceKind::MessageDrop {
                        sender_id: from,
                        recipient_id: to,
                        message_type,
                        reason,
                    },
                ));
            }
        }
    }

    fn record(&mut self, event: TraceEvent) {
        self.metrics.record(&event);
        self.trace.push(event);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fault injection
    // ═══════════════════════════════════════════════════════════════════════

    /// Inject a fault into a replica mid-run.
    pub fn inject_fault(&mut self, replica: ReplicaId, fault: FaultType) {
        if let Some(r) = self.replicas.get_mut(replica.as_usize()) {
            r.inject_fault(fault);
        }
    }

    /// Clear a replica's fault.
    pub fn clear_fault(&mut self, replica: ReplicaId) {
        if let Some(r) = self.replicas.get_mut(replica.as_usize()) {
            r.clear_fault();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inspection (driver API)
    // ═══════════════════════════════════════════════════════════════════════

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            is_running: self.is_running,
            is_paused: self.is_paused,
            current_time: self.now.as_millis() as u64,
            current_view: self.current_view(),
        }
    }

    /// Highest view any live replica has reached.
    pub fn current_view(&self) -> ViewNumber {
        self.replicas
            .iter()
            .map(|r| r.current_view())
            .max()
            .unwrap_or(ViewNumber::GENESIS)
    }

    pub fn replica_states(&self) -> Vec<ReplicaStatus> {
        self.replicas
            .iter()
            .map(|r| ReplicaStatus::snapshot(r, self.config.num_replicas))
            .collect()
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// Export the metrics summary as pretty-printed JSON.
    pub fn export_metrics_json(&self) -> String {
        self.metrics.export_json_string()
    }

    /// The full trace so far.
    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// The most recent `count` trace events.
    pub fn recent_events(&self, count: usize) -> &[TraceEvent] {
        let start = self.trace.len().saturating_sub(count);
        &self.trace[start..]
    }

    /// Messages currently in flight, earliest delivery first.
    pub fn in_flight_messages(&self) -> Vec<InFlightMessage> {
        self.queue
            .envelopes()
            .map(|envelope| InFlightMessage {
                sender_id: envelope.sender,
                recipient_id: envelope.recipient,
                message_type: envelope.message.type_name(),
                send_time_ms: envelope.send_time.as_millis() as u64,
                deliver_time_ms: envelope.deliver_time.as_millis() as u64,
            })
            .collect()
    }

    pub fn replica(&self, id: ReplicaId) -> Option<&Replica> {
        self.replicas.get(id.as_usize())
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    /// Mutable network access for partition and loss experiments.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }
}

fn make_pacemaker(config: &SimConfig) -> Box<dyn Pacemaker> {
    match config.pacemaker_type {
        PacemakerKind::Baseline => Box::new(BaselinePacemaker::new(config.base_timeout())),
        PacemakerKind::Adaptive => Box::new(AdaptivePacemaker::new(PacemakerConfig {
            base_timeout: config.base_timeout(),
            alpha: config.adaptive_alpha,
            k: config.adaptive_k,
            backoff_factor: config.adaptive_backoff,
            min_timeout: Duration::from_millis(config.adaptive_min_timeout_ms),
            max_timeout: Duration::from_millis(config.adaptive_max_timeout_ms),
        })),
    }
}
