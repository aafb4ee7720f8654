//! Durable state for one worker.
//!
//! Layout under `<state_path>/<worker_id>/`:
//!
//! ```text
//! context.json          current WorkerContext, rewritten on every mutation
//! journal.jsonl         bounded activity journal, one JSON object per line
//! checkpoints/<id>.json immutable snapshots, the most recent K are kept
//! ```
//!
//! Every write goes to a temporary sibling first and is renamed into place,
//! so a crash mid-write leaves the previous record intact.

pub mod checkpoint;
pub mod journal;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use journal::{Journal, JournalEntry, JournalKind};
pub use store::{LoadOutcome, StateLimits, StateStore};

use cronbot_core::error::StateError;
use std::path::Path;

pub(crate) fn io_error(path: &Path, e: impl std::fmt::Display) -> StateError {
    StateError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Write `bytes` to `path` via a temporary file and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, e))
}
