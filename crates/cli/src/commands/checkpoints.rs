//! `cronbot checkpoints`: list or restore checkpoints.
//!
//! Restoring rewrites the worker context on disk, so run it while the daemon
//! is stopped; the daemon picks the restored context up on its next start.

use std::path::Path;

use clap::Subcommand;
use cronbot_state::{CheckpointManager, JournalKind, StateStore};

#[derive(Subcommand)]
pub enum Action {
    /// List checkpoints, oldest first
    List,

    /// Replace the worker context with a checkpoint
    Restore {
        /// Checkpoint id as shown by `list`
        id: String,
    },
}

pub async fn run(
    explicit: Option<&Path>,
    action: Action,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(explicit)?;

    match action {
        Action::List => {
            let dir = super::checkpoint_dir(&config);
            let manager = CheckpointManager::open(dir, config.state.max_checkpoints).await?;
            let ids = manager.list().await?;
            if ids.is_empty() {
                println!("No checkpoints for worker {}", config.agent_id_or_default());
                return Ok(());
            }
            println!("Checkpoints for worker {}:", config.agent_id_or_default());
            for id in ids {
                match manager.load(&id).await {
                    Ok(Some(cp)) => println!(
                        "  {id}  {}  phase={}  decisions={}",
                        cp.created_at.format("%Y-%m-%d %H:%M:%S"),
                        cp.phase,
                        cp.context.recent_decisions.len()
                    ),
                    Ok(None) => {}
                    Err(e) => println!("  {id}  (unreadable: {e})"),
                }
            }
        }
        Action::Restore { id } => {
            let (mut store, _) = StateStore::open(
                &config.worker.state_path,
                config.agent_id_or_default(),
                super::state_limits(&config),
            )
            .await?;
            if store.restore_checkpoint(&id).await? {
                store
                    .append_journal(
                        JournalKind::Checkpoint,
                        format!("Restored checkpoint {id} from the command line"),
                        None,
                    )
                    .await?;
                println!("✅ Restored checkpoint {id} (phase {})", store.phase());
            } else {
                return Err(format!("checkpoint '{id}' not found or unreadable").into());
            }
        }
    }

    Ok(())
}
