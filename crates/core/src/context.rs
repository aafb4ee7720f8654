//! Worker context: the single mutable record owned by the control loop.
//!
//! The state store persists it; everyone else receives clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum importance a decision can carry.
pub const MAX_IMPORTANCE: u8 = 10;

/// Decisions at or above this importance survive compaction.
pub const COMPACTION_MIN_IMPORTANCE: u8 = 7;

/// How many important decisions compaction keeps.
pub const COMPACTION_KEEP: usize = 10;

/// Default token ceiling for a worker context.
pub const DEFAULT_TOKEN_BUDGET: u64 = 200_000;

/// Phases of the worker's control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Initializing,
    ReadingContext,
    Planning,
    Executing,
    Verifying,
    Committing,
    Blocked,
    Completed,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::ReadingContext => "reading_context",
            Phase::Planning => "planning",
            Phase::Executing => "executing",
            Phase::Verifying => "verifying",
            Phase::Committing => "committing",
            Phase::Blocked => "blocked",
            Phase::Completed => "completed",
            Phase::Error => "error",
        }
    }

    /// Whether the loop is in the middle of a unit of work.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            Phase::Planning | Phase::Executing | Phase::Verifying | Phase::Committing
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision recorded by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,

    /// 0-10; values above 10 are clamped on construction.
    pub importance: u8,

    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn new(text: impl Into<String>, rationale: Option<String>, importance: u8) -> Self {
        Self {
            text: text.into(),
            rationale,
            importance: importance.min(MAX_IMPORTANCE),
            timestamp: Utc::now(),
        }
    }
}

/// The worker's mutable context.
///
/// Invariant: `recent_decisions.len()` never exceeds the bound passed to
/// [`WorkerContext::push_decision`]; the oldest decision is evicted first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerContext {
    pub phase: Phase,

    #[serde(default)]
    pub active_files: BTreeSet<String>,

    #[serde(default)]
    pub recent_decisions: Vec<Decision>,

    #[serde(default)]
    pub token_count: u64,

    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
}

fn default_token_budget() -> u64 {
    DEFAULT_TOKEN_BUDGET
}

impl Default for WorkerContext {
    fn default() -> Self {
        Self {
            phase: Phase::Initializing,
            active_files: BTreeSet::new(),
            recent_decisions: Vec::new(),
            token_count: 0,
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }
}

impl WorkerContext {
    /// Append a decision, evicting the oldest ones beyond `max_decisions`.
    pub fn push_decision(&mut self, decision: Decision, max_decisions: usize) {
        self.recent_decisions.push(decision);
        if self.recent_decisions.len() > max_decisions {
            let excess = self.recent_decisions.len() - max_decisions;
            self.recent_decisions.drain(..excess);
        }
    }

    /// True once the token count passes 80% of the budget.
    pub fn needs_compaction(&self) -> bool {
        // token_count > budget * 0.8, kept in integer arithmetic
        self.token_count.saturating_mul(5) > self.token_budget.saturating_mul(4)
    }

    /// Keep only the most recent important decisions and reset the token count.
    pub fn compact(&mut self) {
        let important: Vec<Decision> = self
            .recent_decisions
            .iter()
            .filter(|d| d.importance >= COMPACTION_MIN_IMPORTANCE)
            .cloned()
            .collect();
        let skip = important.len().saturating_sub(COMPACTION_KEEP);
        self.recent_decisions = important.into_iter().skip(skip).collect();
        self.token_count = 0;
    }

    /// The last `n` decisions, oldest first.
    pub fn last_decisions(&self, n: usize) -> &[Decision] {
        let start = self.recent_decisions.len().saturating_sub(n);
        &self.recent_decisions[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_is_initializing() {
        let ctx = WorkerContext::default();
        assert_eq!(ctx.phase, Phase::Initializing);
        assert!(ctx.active_files.is_empty());
        assert!(ctx.recent_decisions.is_empty());
        assert_eq!(ctx.token_budget, DEFAULT_TOKEN_BUDGET);
    }

    #[test]
    fn decisions_are_bounded_fifo() {
        let mut ctx = WorkerContext::default();
        for i in 0..8 {
            ctx.push_decision(Decision::new(format!("d{i}"), None, 5), 5);
            assert!(ctx.recent_decisions.len() <= 5);
        }
        let texts: Vec<_> = ctx.recent_decisions.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["d3", "d4", "d5", "d6", "d7"]);
    }

    #[test]
    fn importance_is_clamped() {
        let d = Decision::new("overflow", None, 42);
        assert_eq!(d.importance, MAX_IMPORTANCE);
    }

    #[test]
    fn compaction_threshold_is_eighty_percent() {
        let mut ctx = WorkerContext {
            token_budget: 1000,
            token_count: 800,
            ..Default::default()
        };
        assert!(!ctx.needs_compaction());
        ctx.token_count = 801;
        assert!(ctx.needs_compaction());
    }

    #[test]
    fn compaction_keeps_recent_important_decisions() {
        let mut ctx = WorkerContext::default();
        for i in 0..15 {
            ctx.push_decision(Decision::new(format!("important {i}"), None, 8), 50);
            ctx.push_decision(Decision::new(format!("noise {i}"), None, 3), 50);
        }
        ctx.token_count = 12345;
        ctx.compact();

        assert_eq!(ctx.token_count, 0);
        assert_eq!(ctx.recent_decisions.len(), COMPACTION_KEEP);
        assert!(ctx.recent_decisions.iter().all(|d| d.importance >= 7));
        assert_eq!(ctx.recent_decisions[0].text, "important 5");
        assert_eq!(ctx.recent_decisions[9].text, "important 14");
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_string(&Phase::ReadingContext).unwrap();
        assert_eq!(json, "\"reading_context\"");
        let back: Phase = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(back, Phase::Blocked);
    }

    #[test]
    fn last_decisions_window() {
        let mut ctx = WorkerContext::default();
        for i in 0..3 {
            ctx.push_decision(Decision::new(format!("d{i}"), None, 5), 50);
        }
        assert_eq!(ctx.last_decisions(5).len(), 3);
        assert_eq!(ctx.last_decisions(2)[0].text, "d1");
    }
}
