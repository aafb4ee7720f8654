//! `cronbot status`: show the persisted worker state.
//!
//! Reads the state directory without going through the store, so a corrupt
//! context file is reported instead of being replaced.

use std::path::Path;

use cronbot_core::context::WorkerContext;
use cronbot_state::{CheckpointManager, Journal};

pub async fn run(
    explicit: Option<&Path>,
    journal_tail: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(explicit)?;
    let state_dir = super::worker_state_dir(&config);

    println!("🤖 CronBot Status");
    println!("=================");
    println!("  Worker:       {}", config.agent_id_or_default());
    println!(
        "  Project:      {}",
        config.worker.project_id.as_deref().unwrap_or("(not set)")
    );
    println!("  Autonomy:     {}", config.autonomy.level);
    println!("  Model:        {}", config.oracle.model);
    println!("  Work source:  {}", config.work_source.url);
    println!("  State dir:    {}", state_dir.display());
    println!("  Workspace:    {}", config.worker.workspace_path.display());

    if !state_dir.exists() {
        println!("\n  ⚠️  No state yet. Run `cronbot daemon` first.");
        return Ok(());
    }

    match read_context(&state_dir.join("context.json")).await {
        Ok(ctx) => {
            println!("\n  Phase:        {}", ctx.phase);
            println!("  Tokens:       {} / {}", ctx.token_count, ctx.token_budget);
            if !ctx.active_files.is_empty() {
                println!("  Active files:");
                for file in &ctx.active_files {
                    println!("    - {file}");
                }
            }
            println!("  Recent decisions:");
            let decisions = ctx.last_decisions(5);
            if decisions.is_empty() {
                println!("    (none)");
            }
            for d in decisions {
                println!(
                    "    [{}] {} (importance {})",
                    d.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    d.text,
                    d.importance
                );
            }
        }
        Err(e) => println!("\n  ⚠️  Context unreadable: {e}"),
    }

    let journal = Journal::open(
        state_dir.join("journal.jsonl"),
        config.state.max_journal_entries,
    )
    .await;
    println!("  Journal ({} entries):", journal.len());
    for entry in journal.tail(journal_tail) {
        println!(
            "    {} {:<13} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.kind.as_str(),
            entry.message
        );
    }

    let checkpoints =
        CheckpointManager::open(super::checkpoint_dir(&config), config.state.max_checkpoints)
            .await?;
    match checkpoints.latest().await? {
        Some(cp) => println!(
            "  Latest checkpoint: {} ({}, phase {})",
            cp.id,
            cp.created_at.format("%Y-%m-%d %H:%M:%S"),
            cp.phase
        ),
        None => println!("  Latest checkpoint: (none)"),
    }

    if config.operator.enabled {
        println!(
            "\n  Live status: http://{}:{}/status",
            config.operator.host, config.operator.port
        );
    }

    Ok(())
}

async fn read_context(path: &Path) -> Result<WorkerContext, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
