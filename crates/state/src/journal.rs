//! Append-only activity journal, bounded to the most recent entries.

use chrono::{DateTime, Utc};
use cronbot_core::error::StateError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
    TaskStart,
    TaskComplete,
    Decision,
    Error,
    Checkpoint,
    Blocker,
    Approval,
}

impl JournalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalKind::TaskStart => "task_start",
            JournalKind::TaskComplete => "task_complete",
            JournalKind::Decision => "decision",
            JournalKind::Error => "error",
            JournalKind::Checkpoint => "checkpoint",
            JournalKind::Blocker => "blocker",
            JournalKind::Approval => "approval",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: JournalKind,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl JournalEntry {
    pub fn new(kind: JournalKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A JSONL journal loaded into memory and flushed on every append.
pub struct Journal {
    path: PathBuf,
    entries: VecDeque<JournalEntry>,
    max_entries: usize,
}

impl Journal {
    /// Load the journal at `path`. A missing file starts empty; corrupt lines are skipped.
    pub async fn open(path: PathBuf, max_entries: usize) -> Self {
        let entries = Self::load_from_disk(&path, max_entries).await;
        Self {
            path,
            entries,
            max_entries,
        }
    }

    async fn load_from_disk(path: &Path, max_entries: usize) -> VecDeque<JournalEntry> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(_) => return VecDeque::new(),
        };

        let mut entries: VecDeque<JournalEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted journal entry");
                    None
                }
            })
            .collect();
        while entries.len() > max_entries {
            entries.pop_front();
        }
        entries
    }

    /// Append an entry, drop the oldest beyond the bound, and flush.
    pub async fn append(&mut self, entry: JournalEntry) -> Result<(), StateError> {
        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        self.flush().await
    }

    async fn flush(&self) -> Result<(), StateError> {
        let mut content = String::new();
        for entry in &self.entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| StateError::Serialization(e.to_string()))?;
            content.push_str(&line);
            content.push('\n');
        }
        write_atomic(&self.path, content.as_bytes()).await
    }

    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<JournalEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn journal_is_bounded_and_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let mut journal = Journal::open(path.clone(), 3).await;
        for i in 0..5 {
            journal
                .append(JournalEntry::new(JournalKind::Decision, format!("entry {i}")))
                .await
                .unwrap();
        }
        assert_eq!(journal.len(), 3);

        let reloaded = Journal::open(path, 3).await;
        let messages: Vec<_> = reloaded.entries().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let good = serde_json::to_string(&JournalEntry::new(JournalKind::Error, "boom")).unwrap();
        tokio::fs::write(&path, format!("{{not json\n{good}\n"))
            .await
            .unwrap();

        let journal = Journal::open(path, 10).await;
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.tail(5)[0].kind, JournalKind::Error);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("nope.jsonl"), 10).await;
        assert!(journal.is_empty());
    }
}
