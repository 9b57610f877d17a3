//! Pacemakers: the liveness sub-protocol driving view changes.
//!
//! Both variants share one interface. The replica consults
//! [`Pacemaker::current_timeout`] when arming a view timer; the driver's
//! event queue does the actual scheduling.

use hotstuff_types::ViewNumber;
use std::time::Duration;
use tracing::debug;

/// Tuning knobs shared by both pacemaker variants.
#[derive(Debug, Clone)]
pub struct PacemakerConfig {
    /// Fixed timeout for the baseline variant; initial timeout for adaptive.
    pub base_timeout: Duration,

    /// EMA smoothing factor for observed commit latency (adaptive only).
    pub alpha: f64,

    /// Timeout-to-latency safety multiplier (adaptive only).
    pub k: f64,

    /// Multiplier applied per consecutive timeout (adaptive only).
    pub backoff_factor: f64,

    /// Lower bound on the adaptive timeout.
    pub min_timeout: Duration,

    /// Upper bound on the adaptive timeout, backoff included.
    pub max_timeout: Duration,
}

impl Default for PacemakerConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_millis(1000),
            alpha: 0.3,
            k: 3.0,
            backoff_factor: 1.5,
            min_timeout: Duration::from_millis(500),
            max_timeout: Duration::from_millis(5000),
        }
    }
}

/// View-synchronization interface.
pub trait Pacemaker: Send {
    /// Note that the replica entered `view`. The replica arms a single timer
    /// for `current_timeout()` right after calling this.
    fn on_enter_view(&mut self, view: ViewNumber);

    /// Feed an observed commit latency (proposal receipt to local commit).
    fn on_commit(&mut self, latency: Duration);

    /// The timer for the current view expired; returns the view to move to.
    fn on_timeout(&mut self) -> ViewNumber;

    /// Timeout to use for the current view.
    fn current_timeout(&self) -> Duration;
}

/// Fixed-timeout pacemaker.
#[derive(Debug, Clone)]
pub struct BaselinePacemaker {
    timeout: Duration,
    current_view: ViewNumber,
}

impl BaselinePacemaker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            current_view: ViewNumber::GENESIS,
        }
    }
}

impl Pacemaker for BaselinePacemaker {
    fn on_enter_view(&mut self, view: ViewNumber) {
        self.current_view = view;
    }

    fn on_commit(&mut self, _latency: Duration) {}

    fn on_timeout(&mut self) -> ViewNumber {
        self.current_view.next()
    }

    fn current_timeout(&self) -> Duration {
        self.timeout
    }
}

/// EMA-tuned pacemaker with exponential backoff.
///
/// Tracks an exponentially-weighted moving average of the commit latencies
/// this replica observes. The timeout targets `k × ema`, clamped to
/// `[min_timeout, max_timeout]`; consecutive timeouts multiply it by
/// `backoff_factor` (still capped), and a successful commit resets the
/// backoff. Replicas' EMAs diverge — each reflects its own network view.
#[derive(Debug, Clone)]
pub struct AdaptivePacemaker {
    config: PacemakerConfig,
    current_view: ViewNumber,
    ema_latency_ms: Option<f64>,
    consecutive_timeouts: u32,
}

impl AdaptivePacemaker {
    pub fn new(config: PacemakerConfig) -> Self {
        Self {
            config,
            current_view: ViewNumber::GENESIS,
            ema_latency_ms: None,
            consecutive_timeouts: 0,
        }
    }

    /// The observed latency EMA, if any commit has been seen.
    pub fn ema_latency(&self) -> Option<Duration> {
        self.ema_latency_ms
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }
}

impl Pacemaker for AdaptivePacemaker {
    fn on_enter_view(&mut self, view: ViewNumber) {
        self.current_view = view;
    }

    fn on_commit(&mut self, latency: Duration) {
        let observed = latency.as_secs_f64() * 1000.0;
        let ema = match self.ema_latency_ms {
            Some(prev) => self.config.alpha * observed + (1.0 - self.config.alpha) * prev,
            None => observed,
        };
        self.ema_latency_ms = Some(ema);
        self.consecutive_timeouts = 0;
        debug!(observed_ms = observed, ema_ms = ema, "commit latency observed");
    }

    fn on_timeout(&mut self) -> ViewNumber {
        self.consecutive_timeouts += 1;
        debug!(
            consecutive = self.consecutive_timeouts,
            timeout_ms = self.current_timeout().as_millis() as u64,
            "timeout, backing off"
        );
        self.current_view.next()
    }

    fn current_timeout(&self) -> Duration {
        let base_ms = match self.ema_latency_ms {
            Some(ema) => self.config.k * ema,
            None => self.config.base_timeout.as_secs_f64() * 1000.0,
        };
        let backoff = self
            .config
            .backoff_factor
            .powi(self.consecutive_timeouts as i32);
        let ms = (base_ms * backoff)
            .max(self.config.min_timeout.as_secs_f64() * 1000.0)
            .min(self.config.max_timeout.as_secs_f64() * 1000.0);
        Duration::from_secs_f64(ms / 1000.0)
    }
}
