//! Work source trait: where units of work are claimed and reported.
//!
//! The work source is assumed to enforce at-most-one-claimant per unit;
//! nothing here locks across worker instances.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::blocker::Blocker;
use crate::error::WorkSourceError;

/// One discrete task claimed from the work source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub id: String,
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Free-form category (e.g. "feature", "bug")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Anything else the source attached
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Which work this worker is willing to claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkFilter {
    pub worker_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    InProgress,
    Done,
    Blocked,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::InProgress => "in_progress",
            WorkStatus::Done => "done",
            WorkStatus::Blocked => "blocked",
            WorkStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Claim the next unit of work, or `None` when the queue is empty.
    async fn claim_next(
        &self,
        filter: &WorkFilter,
    ) -> std::result::Result<Option<UnitOfWork>, WorkSourceError>;

    /// Report progress or the final outcome of a unit of work.
    async fn report_outcome(
        &self,
        work_id: &str,
        status: WorkStatus,
        detail: &str,
    ) -> std::result::Result<(), WorkSourceError>;

    /// Surface a detected blocker. Sources without a blocker channel ignore it.
    async fn report_blocker(
        &self,
        _worker_id: &str,
        _blocker: &Blocker,
    ) -> std::result::Result<(), WorkSourceError> {
        Ok(())
    }
}
