//! State store: the persisted WorkerContext plus its journal and checkpoints.
//!
//! Every mutator updates memory and persists the whole context before it
//! returns, so the on-disk record never lags memory by more than the
//! operation in flight.

use cronbot_core::context::{Decision, Phase, WorkerContext};
use cronbot_core::error::StateError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::journal::{Journal, JournalEntry, JournalKind};
use crate::{io_error, write_atomic};

/// Retention bounds and the configured token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLimits {
    pub max_decisions: usize,
    pub max_checkpoints: usize,
    pub max_journal_entries: usize,
    pub token_budget: u64,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self {
            max_decisions: 50,
            max_checkpoints: 10,
            max_journal_entries: 100,
            token_budget: cronbot_core::context::DEFAULT_TOKEN_BUDGET,
        }
    }
}

/// How the context came back on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The persisted context was read back intact
    Loaded,
    /// Nothing was persisted yet
    Fresh,
    /// The persisted context was unreadable and replaced with a default
    Recovered,
}

pub struct StateStore {
    dir: PathBuf,
    context_path: PathBuf,
    context: WorkerContext,
    limits: StateLimits,
    journal: Journal,
    checkpoints: CheckpointManager,
}

impl StateStore {
    /// Open the store for `worker_id` under `root`.
    ///
    /// Read or parse failures never fail startup: the context falls back to a
    /// default and the outcome says so.
    pub async fn open(
        root: impl AsRef<Path>,
        worker_id: &str,
        limits: StateLimits,
    ) -> Result<(Self, LoadOutcome), StateError> {
        let dir = root.as_ref().join(worker_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let context_path = dir.join("context.json");
        let (mut context, outcome) = match tokio::fs::read(&context_path).await {
            Ok(bytes) => match serde_json::from_slice::<WorkerContext>(&bytes) {
                Ok(ctx) => (ctx, LoadOutcome::Loaded),
                Err(e) => {
                    warn!(path = %context_path.display(), error = %e, "Persisted context is corrupted, starting fresh");
                    (WorkerContext::default(), LoadOutcome::Recovered)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (WorkerContext::default(), LoadOutcome::Fresh)
            }
            Err(e) => {
                warn!(path = %context_path.display(), error = %e, "Persisted context is unreadable, starting fresh");
                (WorkerContext::default(), LoadOutcome::Recovered)
            }
        };
        context.token_budget = limits.token_budget;
        if context.recent_decisions.len() > limits.max_decisions {
            let excess = context.recent_decisions.len() - limits.max_decisions;
            context.recent_decisions.drain(..excess);
        }

        let journal = Journal::open(dir.join("journal.jsonl"), limits.max_journal_entries).await;
        let checkpoints =
            CheckpointManager::open(dir.join("checkpoints"), limits.max_checkpoints).await?;

        let store = Self {
            dir,
            context_path,
            context,
            limits,
            journal,
            checkpoints,
        };
        store.persist().await?;

        info!(
            worker_id,
            outcome = ?outcome,
            phase = %store.context.phase,
            "State store initialized"
        );
        Ok((store, outcome))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub fn phase(&self) -> Phase {
        self.context.phase
    }

    pub fn limits(&self) -> StateLimits {
        self.limits
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    async fn persist(&self) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(&self.context)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        write_atomic(&self.context_path, &json).await
    }

    pub async fn set_phase(&mut self, phase: Phase) -> Result<(), StateError> {
        let previous = self.context.phase;
        self.context.phase = phase;
        self.persist().await?;
        debug!(from = %previous, to = %phase, "Phase changed");
        Ok(())
    }

    /// Record a decision and mirror it into the journal.
    pub async fn record_decision(
        &mut self,
        text: impl Into<String>,
        rationale: Option<String>,
        importance: u8,
    ) -> Result<(), StateError> {
        let decision = Decision::new(text, rationale, importance);
        let entry = JournalEntry::new(JournalKind::Decision, decision.text.clone())
            .with_metadata(serde_json::json!({ "importance": decision.importance }));
        self.context
            .push_decision(decision, self.limits.max_decisions);
        self.persist().await?;
        self.journal.append(entry).await
    }

    pub async fn add_active_file(&mut self, path: impl Into<String>) -> Result<(), StateError> {
        if self.context.active_files.insert(path.into()) {
            self.persist().await?;
        }
        Ok(())
    }

    pub async fn remove_active_file(&mut self, path: &str) -> Result<(), StateError> {
        if self.context.active_files.remove(path) {
            self.persist().await?;
        }
        Ok(())
    }

    pub async fn clear_active_files(&mut self) -> Result<(), StateError> {
        self.context.active_files.clear();
        self.persist().await
    }

    pub async fn set_token_count(&mut self, count: u64) -> Result<(), StateError> {
        self.context.token_count = count;
        self.persist().await
    }

    pub async fn add_tokens(&mut self, tokens: u64) -> Result<(), StateError> {
        self.context.token_count = self.context.token_count.saturating_add(tokens);
        self.persist().await
    }

    pub fn needs_compaction(&self) -> bool {
        self.context.needs_compaction()
    }

    /// Drop all but the recent important decisions and reset the token count.
    pub async fn compact_context(&mut self) -> Result<(), StateError> {
        let before = self.context.recent_decisions.len();
        self.context.compact();
        self.persist().await?;
        info!(
            before,
            after = self.context.recent_decisions.len(),
            "Context compacted"
        );
        Ok(())
    }

    pub async fn append_journal(
        &mut self,
        kind: JournalKind,
        message: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), StateError> {
        let mut entry = JournalEntry::new(kind, message);
        entry.metadata = metadata;
        self.journal.append(entry).await
    }

    pub async fn create_checkpoint(
        &mut self,
        last_result: Option<serde_json::Value>,
    ) -> Result<Checkpoint, StateError> {
        let checkpoint = self.checkpoints.create(&self.context, last_result).await?;
        info!(checkpoint_id = %checkpoint.id, phase = %checkpoint.phase, "Checkpoint created");
        Ok(checkpoint)
    }

    /// Replace the context with a stored snapshot.
    ///
    /// Returns `Ok(false)` when the id does not exist or cannot be read.
    pub async fn restore_checkpoint(&mut self, id: &str) -> Result<bool, StateError> {
        let checkpoint = match self.checkpoints.load(id).await {
            Ok(Some(cp)) => cp,
            Ok(None) => {
                warn!(checkpoint_id = id, "Checkpoint not found");
                return Ok(false);
            }
            Err(e) => {
                warn!(checkpoint_id = id, error = %e, "Failed to restore checkpoint");
                return Ok(false);
            }
        };

        self.context = checkpoint.context;
        self.context.token_budget = self.limits.token_budget;
        self.persist().await?;
        info!(checkpoint_id = id, phase = %checkpoint.phase, "Restored from checkpoint");
        Ok(true)
    }

    pub async fn latest_checkpoint(&self) -> Result<Option<Checkpoint>, StateError> {
        self.checkpoints.latest().await
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<String>, StateError> {
        self.checkpoints.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> StateLimits {
        StateLimits {
            max_decisions: 5,
            max_checkpoints: 3,
            max_journal_entries: 100,
            token_budget: 1000,
        }
    }

    #[tokio::test]
    async fn fresh_store_starts_initializing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, outcome) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        assert_eq!(outcome, LoadOutcome::Fresh);
        assert_eq!(store.phase(), Phase::Initializing);
        assert!(store.dir().join("context.json").exists());
    }

    #[tokio::test]
    async fn every_mutation_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, _) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();

        store.set_phase(Phase::Planning).await.unwrap();
        store.add_active_file("src/lib.rs").await.unwrap();
        store.add_active_file("src/main.rs").await.unwrap();
        store.remove_active_file("src/main.rs").await.unwrap();
        store
            .record_decision("Use a trait", Some("testability".into()), 8)
            .await
            .unwrap();
        store.set_token_count(321).await.unwrap();

        let (reloaded, outcome) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(reloaded.context(), store.context());
    }

    #[tokio::test]
    async fn decisions_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, _) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        for i in 0..12 {
            store.record_decision(format!("d{i}"), None, 5).await.unwrap();
            assert!(store.context().recent_decisions.len() <= 5);
        }
        assert_eq!(store.context().recent_decisions[0].text, "d7");
        assert_eq!(store.journal().len(), 12);
    }

    #[tokio::test]
    async fn corrupted_context_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let worker_dir = dir.path().join("w1");
        tokio::fs::create_dir_all(&worker_dir).await.unwrap();
        tokio::fs::write(worker_dir.join("context.json"), b"{\"phase\": 42")
            .await
            .unwrap();

        let (store, outcome) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        assert_eq!(outcome, LoadOutcome::Recovered);
        assert_eq!(store.context(), &WorkerContext {
            token_budget: 1000,
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn compaction_resets_tokens_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, _) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        store.record_decision("keep", None, 9).await.unwrap();
        store.record_decision("drop", None, 2).await.unwrap();
        store.set_token_count(900).await.unwrap();
        assert!(store.needs_compaction());

        store.compact_context().await.unwrap();
        assert!(!store.needs_compaction());

        let (reloaded, _) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        assert_eq!(reloaded.context().token_count, 0);
        assert_eq!(reloaded.context().recent_decisions.len(), 1);
        assert_eq!(reloaded.context().recent_decisions[0].text, "keep");
    }

    #[tokio::test]
    async fn checkpoint_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, _) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        store.set_phase(Phase::Executing).await.unwrap();
        store.add_active_file("a.rs").await.unwrap();
        let cp = store.create_checkpoint(None).await.unwrap();

        store.set_phase(Phase::Error).await.unwrap();
        store.clear_active_files().await.unwrap();

        assert!(store.restore_checkpoint(&cp.id).await.unwrap());
        assert_eq!(store.phase(), Phase::Executing);
        assert!(store.context().active_files.contains("a.rs"));

        let (reloaded, _) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        assert_eq!(reloaded.phase(), Phase::Executing);
    }

    #[tokio::test]
    async fn restoring_missing_checkpoint_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, _) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        assert!(!store.restore_checkpoint("000000000007-abcdef12").await.unwrap());
        assert!(store.latest_checkpoint().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoints_are_trimmed_to_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, _) = StateStore::open(dir.path(), "w1", limits()).await.unwrap();
        let mut last = String::new();
        for _ in 0..8 {
            last = store.create_checkpoint(None).await.unwrap().id;
        }
        assert_eq!(store.list_checkpoints().await.unwrap().len(), 3);
        assert_eq!(store.latest_checkpoint().await.unwrap().unwrap().id, last);
    }

    #[tokio::test]
    async fn workers_do_not_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut a, _) = StateStore::open(dir.path(), "a", limits()).await.unwrap();
        a.set_phase(Phase::Verifying).await.unwrap();
        let (b, outcome) = StateStore::open(dir.path(), "b", limits()).await.unwrap();
        assert_eq!(outcome, LoadOutcome::Fresh);
        assert_eq!(b.phase(), Phase::Initializing);
    }
}
