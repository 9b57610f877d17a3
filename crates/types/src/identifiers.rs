//! Identifier newtypes and protocol enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A replica identifier, stable for the lifetime of a run.
///
/// Replica ids are dense: `[0, N)` for a network of N replicas, which makes
/// them usable as vector indices in the simulation driver.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ReplicaId(pub u32);

impl ReplicaId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A view number. Monotonically non-decreasing per replica.
///
/// View 0 is reserved for genesis; consensus runs from view 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ViewNumber(pub u64);

impl ViewNumber {
    /// The genesis view.
    pub const GENESIS: Self = Self(0);

    /// The view after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ViewNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step of the HotStuff voting cascade.
///
/// Basic HotStuff walks Prepare → PreCommit → Commit → Decide within a single
/// view; NewView is the between-views collection phase. Chained HotStuff uses
/// Prepare as its single generic phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    NewView,
    Prepare,
    PreCommit,
    Commit,
    Decide,
}

impl Phase {
    /// Wire/trace name for this phase.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::NewView => "NEW_VIEW",
            Phase::Prepare => "PREPARE",
            Phase::PreCommit => "PRE_COMMIT",
            Phase::Commit => "COMMIT",
            Phase::Decide => "DECIDE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fault behaviors that can be injected into a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultType {
    /// No fault, replica operates correctly.
    #[default]
    None,
    /// Replica produces nothing and discards all input.
    Crash,
    /// Replica keeps absorbing state but never sends a message.
    Silent,
    /// Each outgoing message is dropped with a configured probability.
    RandomDrop,
    /// As leader, proposes two conflicting blocks to disjoint halves.
    ByzantineEquivocate,
}

impl FaultType {
    pub fn is_faulty(&self) -> bool {
        !matches!(self, FaultType::None)
    }
}

/// Which pacemaker variant drives view synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PacemakerKind {
    /// Fixed timeout.
    #[default]
    Baseline,
    /// EMA-tuned timeout with backoff.
    Adaptive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_number_next() {
        assert_eq!(ViewNumber(3).next(), ViewNumber(4));
        assert_eq!(ViewNumber::GENESIS.next(), ViewNumber(1));
    }

    #[test]
    fn test_fault_type_serde_names() {
        let json = serde_json::to_string(&FaultType::RandomDrop).unwrap();
        assert_eq!(json, "\"RANDOM_DROP\"");
        let parsed: FaultType = serde_json::from_str("\"BYZANTINE_EQUIVOCATE\"").unwrap();
        assert_eq!(parsed, FaultType::ByzantineEquivocate);
    }

    #[test]
    fn test_pacemaker_kind_serde_names() {
        let parsed: PacemakerKind = serde_json::from_str("\"adaptive\"").unwrap();
        assert_eq!(parsed, PacemakerKind::Adaptive);
    }
}
