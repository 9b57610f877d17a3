//! Simulation configuration.
//!
//! All options are deserializable (the config API posts them as JSON) and
//! overridable through `HOTSTUFF_`-prefixed environment variables.

use hotstuff_types::{FaultType, PacemakerKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Total number of replicas (N).
    pub num_replicas: u32,

    /// Number of replicas to make faulty (f). Faults are applied to the
    /// highest-numbered replicas when `fault_type` is not `NONE`.
    pub num_faulty: u32,

    /// Behavior of the faulty replicas.
    pub fault_type: FaultType,

    /// Drop probability for each outgoing message of a RANDOM_DROP replica.
    pub fault_drop_probability: f64,

    /// Which pacemaker variant to use.
    pub pacemaker_type: PacemakerKind,

    /// Base view timeout (Δ) in milliseconds.
    pub base_timeout_ms: u64,

    /// Base one-way network latency in milliseconds.
    pub network_latency_ms: u64,

    /// Uniform latency jitter (±) in milliseconds.
    pub network_jitter_ms: u64,

    /// Network-wide packet loss probability in [0, 1].
    pub drop_probability: f64,

    /// PRNG seed. Runs with identical config and seed are bit-identical.
    pub seed: u64,

    /// Stop once every live replica has passed this view.
    pub max_views: u64,

    /// Run Chained HotStuff (one pipelined phase per view) instead of Basic.
    pub chained: bool,

    /// Adaptive pacemaker: EMA smoothing factor in (0, 1).
    pub adaptive_alpha: f64,

    /// Adaptive pacemaker: timeout-to-latency multiplier.
    pub adaptive_k: f64,

    /// Adaptive pacemaker: backoff multiplier per consecutive timeout.
    pub adaptive_backoff: f64,

    /// Adaptive pacemaker: timeout floor in milliseconds.
    pub adaptive_min_timeout_ms: u64,

    /// Adaptive pacemaker: timeout ceiling in milliseconds.
    pub adaptive_max_timeout_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_replicas: 4,
            num_faulty: 1,
            fault_type: FaultType::None,
            fault_drop_probability: 0.5,
            pacemaker_type: PacemakerKind::Baseline,
            base_timeout_ms: 1000,
            network_latency_ms: 50,
            network_jitter_ms: 10,
            drop_probability: 0.0,
            seed: 42,
            max_views: 100,
            chained: false,
            adaptive_alpha: 0.3,
            adaptive_k: 3.0,
            adaptive_backoff: 1.5,
            adaptive_min_timeout_ms: 500,
            adaptive_max_timeout_ms: 5000,
        }
    }
}

/// Derived sizes returned by the config API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigSummary {
    pub quorum_size: usize,
    pub max_faulty: u32,
}

impl SimConfig {
    /// Maximum faulty replicas the protocol tolerates: ⌊(N−1)/3⌋.
    pub fn max_faulty(&self) -> u32 {
        (self.num_replicas.saturating_sub(1)) / 3
    }

    /// Votes required for a QC: `N − f`, with `f` capped at the tolerable
    /// maximum so an over-faulted run keeps a meaningful (if unreachable)
    /// quorum.
    pub fn quorum_size(&self) -> usize {
        (self.num_replicas - self.num_faulty.min(self.max_faulty())) as usize
    }

    /// Whether the configured fault count stays within the safe bound.
    pub fn is_fault_tolerant(&self) -> bool {
        self.num_faulty <= self.max_faulty()
    }

    /// Validate ranges and the BFT bound.
    ///
    /// This is the config API's strict contract: a fault count beyond
    /// `(N−1)/3` is an error here, though the driver will still run such a
    /// configuration (with a warning) for liveness experiments.
    pub fn validate(&self) -> Result<ConfigSummary, ConfigError> {
        if self.num_replicas < 1 {
            return Err(ConfigError::NoReplicas);
        }
        if self.base_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_views == 0 {
            return Err(ConfigError::ZeroMaxViews);
        }
        for (name, value) in [
            ("drop_probability", self.drop_probability),
            ("fault_drop_probability", self.fault_drop_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    name,
                    range: "[0, 1]",
                    value,
                });
            }
        }
        if !(0.0..1.0).contains(&self.adaptive_alpha) || self.adaptive_alpha == 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "adaptive_alpha",
                range: "(0, 1)",
                value: self.adaptive_alpha,
            });
        }
        if !self.is_fault_tolerant() {
            return Err(ConfigError::TooManyFaulty {
                num_faulty: self.num_faulty,
                max_faulty: self.max_faulty(),
                num_replicas: self.num_replicas,
            });
        }
        Ok(ConfigSummary {
            quorum_size: self.quorum_size(),
            max_faulty: self.max_faulty(),
        })
    }

    pub fn base_timeout(&self) -> Duration {
        Duration::from_millis(self.base_timeout_ms)
    }

    /// Build a config from the environment, starting from defaults.
    /// Recognized variables are prefixed `HOTSTUFF_` (e.g.
    /// `HOTSTUFF_NUM_REPLICAS`, `HOTSTUFF_PACEMAKER_TYPE`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        read_env("HOTSTUFF_NUM_REPLICAS", &mut config.num_replicas)?;
        read_env("HOTSTUFF_NUM_FAULTY", &mut config.num_faulty)?;
        read_env_with("HOTSTUFF_FAULT_TYPE", &mut config.fault_type, parse_fault)?;
        read_env(
            "HOTSTUFF_FAULT_DROP_PROBABILITY",
            &mut config.fault_drop_probability,
        )?;
        read_env_with(
            "HOTSTUFF_PACEMAKER_TYPE",
            &mut config.pacemaker_type,
            parse_pacemaker,
        )?;
        read_env("HOTSTUFF_BASE_TIMEOUT_MS", &mut config.base_timeout_ms)?;
        read_env("HOTSTUFF_NETWORK_LATENCY_MS", &mut config.network_latency_ms)?;
        read_env("HOTSTUFF_NETWORK_JITTER_MS", &mut config.network_jitter_ms)?;
        read_env("HOTSTUFF_DROP_PROBABILITY", &mut config.drop_probability)?;
        read_env("HOTSTUFF_SEED", &mut config.seed)?;
        read_env("HOTSTUFF_MAX_VIEWS", &mut config.max_views)?;
        read_env("HOTSTUFF_CHAINED", &mut config.chained)?;
        read_env("HOTSTUFF_ADAPTIVE_ALPHA", &mut config.adaptive_alpha)?;
        read_env("HOTSTUFF_ADAPTIVE_K", &mut config.adaptive_k)?;
        read_env(
            "HOTSTUFF_ADAPTIVE_MIN_TIMEOUT_MS",
            &mut config.adaptive_min_timeout_ms,
        )?;
        read_env(
            "HOTSTUFF_ADAPTIVE_MAX_TIMEOUT_MS",
            &mut config.adaptive_max_timeout_ms,
        )?;
        Ok(config)
    }
}

/// Invalid configuration, surfaced synchronously from the config API and
/// never from inside the step loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("num_replicas must be at least 1")]
    NoReplicas,

    #[error("base_timeout_ms must be positive")]
    ZeroTimeout,

    #[error("max_views must be positive")]
    ZeroMaxViews,

    #[error("{name} must be within {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error(
        "num_faulty {num_faulty} exceeds the tolerable maximum {max_faulty} \
         for {num_replicas} replicas"
    )]
    TooManyFaulty {
        num_faulty: u32,
        max_faulty: u32,
        num_replicas: u32,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
}

fn read_env<T: std::str::FromStr>(var: &str, slot: &mut T) -> Result<(), ConfigError> {
    if let Ok(raw) = std::env::var(var) {
        *slot = raw.parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn read_env_with<T>(
    var: &str,
    slot: &mut T,
    parse: fn(&str) -> Option<T>,
) -> Result<(), ConfigError> {
    if let Ok(raw) = std::env::var(var) {
        *slot = parse(&raw).ok_or_else(|| ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn parse_fault(raw: &str) -> Option<FaultType> {
    match raw.to_ascii_uppercase().as_str() {
        "NONE" => Some(FaultType::None),
        "CRASH" => Some(FaultType::Crash),
        "SILENT" => Some(FaultType::Silent),
        "RANDOM_DROP" => Some(FaultType::RandomDrop),
        "BYZANTINE_EQUIVOCATE" => Some(FaultType::ByzantineEquivocate),
        _ => None,
    }
}

fn parse_pacemaker(raw: &str) -> Option<PacemakerKind> {
    match raw.to_ascii_lowercase().as_str() {
        "baseline" => Some(PacemakerKind::Baseline),
        "adaptive" => Some(PacemakerKind::Adaptive),
        _ => None,
    }
}
