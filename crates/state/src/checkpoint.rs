//! Checkpoint manager: immutable, size-bounded snapshots of the worker context.
//!
//! Ids are `<sequence>-<random>` with a zero-padded sequence, so sorting ids
//! lexicographically sorts checkpoints by creation order.

use chrono::{DateTime, Utc};
use cronbot_core::context::{Phase, WorkerContext};
use cronbot_core::error::StateError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{io_error, write_atomic};

/// An immutable snapshot of the worker context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
    pub context: WorkerContext,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<serde_json::Value>,
}

pub struct CheckpointManager {
    dir: PathBuf,
    max_checkpoints: usize,
    next_seq: u64,
}

impl CheckpointManager {
    /// Open (and create) the checkpoint directory, resuming the id sequence.
    pub async fn open(dir: PathBuf, max_checkpoints: usize) -> Result<Self, StateError> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let next_seq = list_ids(&dir)
            .await?
            .iter()
            .filter_map(|id| sequence_of(id))
            .max()
            .map_or(0, |seq| seq + 1);

        Ok(Self {
            dir,
            max_checkpoints,
            next_seq,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot `context`, write it under a fresh id, then trim to the newest K.
    pub async fn create(
        &mut self,
        context: &WorkerContext,
        last_result: Option<serde_json::Value>,
    ) -> Result<Checkpoint, StateError> {
        let random = Uuid::new_v4().simple().to_string();
        let id = format!("{:012}-{}", self.next_seq, &random[..8]);
        self.next_seq += 1;

        let checkpoint = Checkpoint {
            id: id.clone(),
            created_at: Utc::now(),
            phase: context.phase,
            context: context.clone(),
            last_result,
        };
        let json = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        write_atomic(&self.path_for(&id), &json).await?;

        self.trim().await?;
        debug!(checkpoint_id = %id, phase = %checkpoint.phase, "Checkpoint written");
        Ok(checkpoint)
    }

    /// Load one checkpoint. A missing id is `Ok(None)`; an unreadable file is `Corrupted`.
    pub async fn load(&self, id: &str) -> Result<Option<Checkpoint>, StateError> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StateError::Corrupted {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// The most recently created readable checkpoint. Corrupt files are skipped.
    pub async fn latest(&self) -> Result<Option<Checkpoint>, StateError> {
        for id in list_ids(&self.dir).await?.iter().rev() {
            match self.load(id).await {
                Ok(Some(checkpoint)) => return Ok(Some(checkpoint)),
                Ok(None) => continue,
                Err(StateError::Corrupted { path, reason }) => {
                    warn!(%path, %reason, "Skipping corrupted checkpoint");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// All checkpoint ids, oldest first.
    pub async fn list(&self) -> Result<Vec<String>, StateError> {
        list_ids(&self.dir).await
    }

    async fn trim(&self) -> Result<(), StateError> {
        let ids = list_ids(&self.dir).await?;
        let excess = ids.len().saturating_sub(self.max_checkpoints);
        for id in &ids[..excess] {
            let path = self.path_for(id);
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| io_error(&path, e))?;
            debug!(checkpoint_id = %id, "Old checkpoint removed");
        }
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn sequence_of(id: &str) -> Option<u64> {
    id.split_once('-').and_then(|(seq, _)| seq.parse().ok())
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

async fn list_ids(dir: &Path) -> Result<Vec<String>, StateError> {
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error(dir, e))?;
    let mut ids = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(dir, e))? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(id) = name.strip_suffix(".json")
            && sequence_of(id).is_some()
        {
            ids.push(id.to_string());
        }
    }
    // Padding keeps names sortable as text, but past 12 digits only the number orders them.
    ids.sort_by_key(|id| (sequence_of(id).unwrap_or(0), id.clone()));
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager(dir: &Path, max: usize) -> CheckpointManager {
        CheckpointManager::open(dir.join("checkpoints"), max)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn retention_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path(), 10).await;

        let mut created = Vec::new();
        for _ in 0..15 {
            created.push(mgr.create(&WorkerContext::default(), None).await.unwrap().id);
        }

        let remaining = mgr.list().await.unwrap();
        assert_eq!(remaining.len(), 10);
        assert_eq!(remaining, created[5..].to_vec());
    }

    #[tokio::test]
    async fn ids_sort_by_creation_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let mut mgr = manager(dir.path(), 10).await;
            mgr.create(&WorkerContext::default(), None).await.unwrap()
        };
        let mut mgr = manager(dir.path(), 10).await;
        let second = mgr.create(&WorkerContext::default(), None).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(mgr.latest().await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn ordering_follows_the_sequence_past_the_padding_width() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = dir.path().join("checkpoints");
        tokio::fs::create_dir_all(&checkpoints).await.unwrap();
        for id in ["999999999999-aaaaaaaa", "1000000000000-bbbbbbbb"] {
            tokio::fs::write(checkpoints.join(format!("{id}.json")), b"{}")
                .await
                .unwrap();
        }

        let mut mgr = manager(dir.path(), 10).await;
        let next = mgr.create(&WorkerContext::default(), None).await.unwrap();
        assert!(next.id.starts_with("1000000000001-"));

        let ids = mgr.list().await.unwrap();
        assert_eq!(ids[0], "999999999999-aaaaaaaa");
        assert_eq!(ids[1], "1000000000000-bbbbbbbb");
        assert_eq!(ids[2], next.id);
    }

    #[tokio::test]
    async fn snapshot_is_a_deep_copy() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path(), 10).await;
        let mut ctx = WorkerContext::default();
        ctx.active_files.insert("src/main.rs".into());

        let cp = mgr
            .create(&ctx, Some(serde_json::json!({"tool": "write_file"})))
            .await
            .unwrap();
        ctx.active_files.clear();

        let loaded = mgr.load(&cp.id).await.unwrap().unwrap();
        assert!(loaded.context.active_files.contains("src/main.rs"));
        assert_eq!(loaded.last_result.unwrap()["tool"], "write_file");
    }

    #[tokio::test]
    async fn missing_and_invalid_ids_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), 10).await;
        assert!(mgr.load("000000000042-deadbeef").await.unwrap().is_none());
        assert!(mgr.load("../context").await.unwrap().is_none());
        assert!(mgr.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_skips_corrupted_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path(), 10).await;
        let good = mgr.create(&WorkerContext::default(), None).await.unwrap();
        tokio::fs::write(mgr.dir().join("000000000099-ffffffff.json"), b"{truncated")
            .await
            .unwrap();

        let latest = mgr.latest().await.unwrap().unwrap();
        assert_eq!(latest.id, good.id);
        assert!(matches!(
            mgr.load("000000000099-ffffffff").await,
            Err(StateError::Corrupted { .. })
        ));
    }
}
