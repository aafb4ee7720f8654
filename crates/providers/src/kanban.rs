//! HTTP work source backed by the kanban service.
//!
//! - `GET  /projects/{projectId}/tasks/next` claims the next task
//!   (`204`, `404` or a `null` body mean the queue is empty)
//! - `PATCH /tasks/{taskId}` reports status, with `blockedReason` when blocked
//! - `POST /agents/{agentId}/blockers` surfaces a detected blocker

use std::time::Duration;

use async_trait::async_trait;
use cronbot_core::blocker::Blocker;
use cronbot_core::error::WorkSourceError;
use cronbot_core::work::{UnitOfWork, WorkFilter, WorkSource, WorkStatus};
use serde::Deserialize;
use tracing::debug;

/// A task as the kanban API returns it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KanbanTask {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "type")]
    task_type: Option<String>,
}

pub struct KanbanWorkSource {
    base_url: String,
    client: reqwest::Client,
}

impl KanbanWorkSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WorkSourceError> {
        let client =
            crate::http_client(timeout).map_err(|e| WorkSourceError::Request(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, WorkSourceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(WorkSourceError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn into_unit(raw: serde_json::Value) -> Result<Option<UnitOfWork>, WorkSourceError> {
        if raw.is_null() {
            return Ok(None);
        }
        let task: KanbanTask = serde_json::from_value(raw.clone())
            .map_err(|e| WorkSourceError::Decode(e.to_string()))?;
        Ok(Some(UnitOfWork {
            id: task.id,
            title: task.title,
            description: task.description.unwrap_or_default(),
            kind: task.task_type,
            payload: raw,
        }))
    }
}

#[async_trait]
impl WorkSource for KanbanWorkSource {
    async fn claim_next(
        &self,
        filter: &WorkFilter,
    ) -> std::result::Result<Option<UnitOfWork>, WorkSourceError> {
        let project = filter
            .project_id
            .as_deref()
            .ok_or_else(|| WorkSourceError::Request("no project id configured".into()))?;
        let url = format!("{}/projects/{project}/tasks/next", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("X-Agent-Id", &filter.worker_id)
            .send()
            .await
            .map_err(|e| WorkSourceError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 204 || status == 404 {
            debug!(project, "No task available");
            return Ok(None);
        }
        let response = Self::check(response).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WorkSourceError::Request(e.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let raw: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| WorkSourceError::Decode(e.to_string()))?;
        Self::into_unit(raw)
    }

    async fn report_outcome(
        &self,
        work_id: &str,
        status: WorkStatus,
        detail: &str,
    ) -> std::result::Result<(), WorkSourceError> {
        let url = format!("{}/tasks/{work_id}", self.base_url);
        let mut body = serde_json::json!({ "status": status.as_str() });
        if matches!(status, WorkStatus::Blocked | WorkStatus::Failed) && !detail.is_empty() {
            body["blockedReason"] = serde_json::json!(detail);
        }

        let response = self
            .client
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkSourceError::Request(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn report_blocker(
        &self,
        worker_id: &str,
        blocker: &Blocker,
    ) -> std::result::Result<(), WorkSourceError> {
        let url = format!("{}/agents/{worker_id}/blockers", self.base_url);
        let body = serde_json::json!({
            "type": blocker.kind.as_str(),
            "severity": blocker.severity,
            "description": blocker.description,
            "suggestedAction": blocker.suggested_action,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkSourceError::Request(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}
