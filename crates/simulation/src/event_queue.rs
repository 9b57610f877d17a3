//! Event queue with deterministic ordering.

use hotstuff_types::{Envelope, ReplicaId, ViewNumber};
use std::collections::BTreeMap;
use std::time::Duration;

/// Key for ordering events in the queue.
///
/// Events are ordered by time, then by insertion sequence. The sequence
/// number is a monotonically increasing counter guaranteeing a total order
/// even for equal times — the sole tiebreak, and the sole source of
/// determinism for simultaneous events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    /// When this event should be processed.
    pub time: Duration,
    /// Insertion counter for deterministic FIFO ordering at equal times.
    pub sequence: u64,
}

/// A scheduled occurrence: a message delivery or a timer expiry.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// Deliver an in-flight envelope to its recipient.
    Deliver(Envelope),

    /// A pacemaker timer armed by `replica` for `view` expires.
    Timeout { replica: ReplicaId, view: ViewNumber },
}

impl SimEvent {
    /// The replica this event is dispatched to.
    pub fn target(&self) -> ReplicaId {
        match self {
            SimEvent::Deliver(envelope) => envelope.recipient,
            SimEvent::Timeout { replica, .. } => *replica,
        }
    }
}

/// The pending-event queue: a `BTreeMap` ordered by [`EventKey`].
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: BTreeMap<EventKey, SimEvent>,
    sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an event at `time`. Returns the assigned key.
    pub fn push(&mut self, time: Duration, event: SimEvent) -> EventKey {
        self.sequence += 1;
        let key = EventKey {
            time,
            sequence: self.sequence,
        };
        self.queue.insert(key, event);
        key
    }

    /// Pop the earliest event.
    pub fn pop(&mut self) -> Option<(EventKey, SimEvent)> {
        self.queue.pop_first()
    }

    /// Time of the earliest event, if any.
    pub fn peek_time(&self) -> Option<Duration> {
        self.queue.first_key_value().map(|(key, _)| key.time)
    }

    /// Remove obsolete timers: every `Timeout` belonging to `replica` with a
    /// view strictly below `view`. Returns how many were cancelled.
    pub fn cancel_timers_below(&mut self, replica: ReplicaId, view: ViewNumber) -> usize {
        let before = self.queue.len();
        self.queue.retain(|_, event| {
            !matches!(
                event,
                SimEvent::Timeout { replica: r, view: v } if *r == replica && *v < view
            )
        });
        before - self.queue.len()
    }

    /// In-flight envelopes, earliest delivery first.
    pub fn envelopes(&self) -> impl Iterator<Item = &Envelope> {
        self.queue.values().filter_map(|event| match event {
            SimEvent::Deliver(envelope) => Some(envelope),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
