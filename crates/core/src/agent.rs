//! Autonomy levels and the worker's externally visible status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::blocker::Blocker;
use crate::context::Phase;

/// How much freedom the worker has to act without approval.
///
/// Levels are ordered: a higher tier never needs more approvals than a lower one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AutonomyLevel {
    /// Tier 0: read-only, responds when spoken to
    Reactive,
    /// Tier 1: reads and plans, approval on writes
    Cautious,
    /// Tier 2: autonomous on tasks, approval on major changes (default)
    #[default]
    Balanced,
    /// Tier 3: full sandbox autonomy, only security-critical ops need approval
    FullAutonomy,
}

impl AutonomyLevel {
    pub const MAX: AutonomyLevel = AutonomyLevel::FullAutonomy;

    /// Numeric tier, 0 through 3.
    pub fn tier(&self) -> u8 {
        match self {
            AutonomyLevel::Reactive => 0,
            AutonomyLevel::Cautious => 1,
            AutonomyLevel::Balanced => 2,
            AutonomyLevel::FullAutonomy => 3,
        }
    }

    pub fn from_tier(tier: u8) -> Option<Self> {
        match tier {
            0 => Some(AutonomyLevel::Reactive),
            1 => Some(AutonomyLevel::Cautious),
            2 => Some(AutonomyLevel::Balanced),
            3 => Some(AutonomyLevel::FullAutonomy),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AutonomyLevel::Reactive => "reactive",
            AutonomyLevel::Cautious => "cautious",
            AutonomyLevel::Balanced => "balanced",
            AutonomyLevel::FullAutonomy => "full",
        }
    }

    /// Human-readable description used in the system prompt.
    pub fn description(&self) -> &'static str {
        match self {
            AutonomyLevel::Reactive => "Read-only, responds when spoken to",
            AutonomyLevel::Cautious => "Read/analyze, plans before executing, approval on writes",
            AutonomyLevel::Balanced => "Autonomous on tasks, approval on major changes",
            AutonomyLevel::FullAutonomy => {
                "Full sandbox autonomy, only security-critical ops need approval"
            }
        }
    }

    /// Parse leniently: unknown values fall back to [`AutonomyLevel::Balanced`].
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!(value, "Unknown autonomy level, defaulting to balanced");
            AutonomyLevel::Balanced
        })
    }
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.tier(), self.name())
    }
}

impl FromStr for AutonomyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(tier) = trimmed.parse::<u8>() {
            return Self::from_tier(tier).ok_or_else(|| format!("autonomy tier {tier} out of range 0-3"));
        }
        match trimmed.to_lowercase().as_str() {
            "reactive" | "readonly" | "read_only" => Ok(AutonomyLevel::Reactive),
            "cautious" => Ok(AutonomyLevel::Cautious),
            "balanced" | "default" => Ok(AutonomyLevel::Balanced),
            "full" | "autonomous" | "full_autonomy" => Ok(AutonomyLevel::FullAutonomy),
            other => Err(format!("unknown autonomy level '{other}'")),
        }
    }
}

impl Serialize for AutonomyLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for AutonomyLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Tier(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Tier(tier) => Self::from_tier(tier).ok_or_else(|| {
                serde::de::Error::custom(format!("autonomy tier {tier} out of range 0-3"))
            }),
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Coarse worker state, independent of the fine-grained [`Phase`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Idle,
    Working,
    Blocked,
    Error,
    Terminated,
}

/// Snapshot of the worker exposed to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_work_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_blocker: Option<Blocker>,

    /// Units of work finished since startup
    pub completed: u64,

    /// Units of work that failed since startup
    pub failed: u64,

    pub updated_at: DateTime<Utc>,
}

impl WorkerStatus {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: WorkerState::Idle,
            phase: Phase::Initializing,
            current_work_id: None,
            last_blocker: None,
            completed: 0,
            failed: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Operator request to clear the worker's tool-failure tallies.
///
/// Clones share one flag. The operator side calls [`request`](Self::request);
/// the worker [`take`](Self::take)s it at the start of its next iteration.
#[derive(Debug, Clone, Default)]
pub struct FailureReset(Arc<AtomicBool>);

impl FailureReset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// True once per request.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomy_defaults_to_balanced() {
        assert_eq!(AutonomyLevel::default(), AutonomyLevel::Balanced);
    }

    #[test]
    fn autonomy_levels_are_ordered() {
        assert!(AutonomyLevel::Reactive < AutonomyLevel::Cautious);
        assert!(AutonomyLevel::Balanced < AutonomyLevel::FullAutonomy);
        assert_eq!(AutonomyLevel::MAX.tier(), 3);
    }

    #[test]
    fn parse_numbers_and_aliases() {
        assert_eq!("0".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::Reactive);
        assert_eq!("readonly".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::Reactive);
        assert_eq!("Cautious".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::Cautious);
        assert_eq!("default".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::Balanced);
        assert_eq!("autonomous".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::FullAutonomy);
        assert!("7".parse::<AutonomyLevel>().is_err());
        assert!("yolo".parse::<AutonomyLevel>().is_err());
    }

    #[test]
    fn lenient_parse_falls_back_to_balanced() {
        assert_eq!(AutonomyLevel::parse_lenient("nonsense"), AutonomyLevel::Balanced);
        assert_eq!(AutonomyLevel::parse_lenient("3"), AutonomyLevel::FullAutonomy);
    }

    #[test]
    fn deserializes_from_tier_or_name() {
        let from_num: AutonomyLevel = serde_json::from_str("1").unwrap();
        assert_eq!(from_num, AutonomyLevel::Cautious);
        let from_name: AutonomyLevel = serde_json::from_str("\"full\"").unwrap();
        assert_eq!(from_name, AutonomyLevel::FullAutonomy);
        assert!(serde_json::from_str::<AutonomyLevel>("9").is_err());
        assert_eq!(serde_json::to_string(&AutonomyLevel::Balanced).unwrap(), "\"balanced\"");
    }

    #[test]
    fn display_mentions_tier() {
        assert_eq!(AutonomyLevel::Balanced.to_string(), "2 (balanced)");
    }

    #[test]
    fn status_starts_idle() {
        let status = WorkerStatus::new("worker-1");
        assert_eq!(status.state, WorkerState::Idle);
        assert_eq!(status.phase, Phase::Initializing);
        assert!(status.current_work_id.is_none());
    }

    #[test]
    fn failure_reset_is_taken_once() {
        let operator = FailureReset::new();
        let worker = operator.clone();
        assert!(!worker.take());

        operator.request();
        operator.request();
        assert!(worker.is_pending());
        assert!(worker.take());
        assert!(!worker.take());
        assert!(!operator.is_pending());
    }
}
