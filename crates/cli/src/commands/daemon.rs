//! `cronbot daemon`: run the worker until interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cronbot_agent::{Worker, WorkerSettings};
use cronbot_core::event::{DomainEvent, EventBus};
use cronbot_providers::{AnthropicOracle, KanbanWorkSource};
use cronbot_security::AuditLogger;
use cronbot_state::StateStore;
use cronbot_tools::{BUILTIN_PROVIDER_ID, CapabilityRegistry, builtin_provider};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub async fn run(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(explicit)?;
    config.require_daemon_credentials()?;
    let Some(api_key) = config.oracle.api_key.clone() else {
        return Err("ANTHROPIC_API_KEY is required".into());
    };

    let settings = WorkerSettings::from_config(&config);
    println!("🤖 CronBot Daemon: starting worker {}", settings.worker_id);
    println!("   Project:   {}", settings.project_id.as_deref().unwrap_or("-"));
    println!("   Autonomy:  {}", config.autonomy.level);
    println!("   Board:     {}", config.work_source.url);
    println!("   Workspace: {}", config.worker.workspace_path.display());

    let (store, load_outcome) = StateStore::open(
        &config.worker.state_path,
        &settings.worker_id,
        super::state_limits(&config),
    )
    .await?;

    let events = Arc::new(EventBus::default());
    let registry = Arc::new(
        CapabilityRegistry::new(config.autonomy.level)
            .with_audit(Arc::new(AuditLogger::tracing()))
            .with_event_bus(events.clone())
            .with_actor(settings.worker_id.clone()),
    );
    if config.tools.enable_builtin {
        tokio::fs::create_dir_all(&config.worker.workspace_path).await?;
        let tools = builtin_provider(
            &config.worker.workspace_path,
            Duration::from_secs(config.tools.command_timeout_secs),
        );
        registry
            .register_server(BUILTIN_PROVIDER_ID, Arc::new(tools))
            .await?;
    }

    let oracle = AnthropicOracle::new(
        api_key,
        Duration::from_secs(config.control_loop.reasoning_timeout_secs),
    )?
    .with_base_url(&config.oracle.base_url)
    .with_model(&config.oracle.model)
    .with_max_tokens(config.oracle.max_tokens);
    let work_source = KanbanWorkSource::new(
        &config.work_source.url,
        Duration::from_secs(config.work_source.request_timeout_secs),
    )?;

    let mut worker = Worker::new(
        settings,
        store,
        load_outcome,
        registry.clone(),
        Arc::new(oracle),
        Arc::new(work_source),
    )
    .with_event_bus(events.clone());
    let stop = worker.stop_handle();

    // Ctrl-C stops the loop after the current unit of work
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping after the current step");
                signal_stop.stop();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
    });

    // Mirror domain events into the log
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "Event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let operator = if config.operator.enabled {
        let addr = format!("{}:{}", config.operator.host, config.operator.port);
        let state = Arc::new(
            cronbot_gateway::OperatorState::new(registry, worker.subscribe_status())
                .with_failure_reset(worker.failure_reset_handle()),
        );
        let shutdown = stop.clone();
        println!("   Operator:  http://{addr}");
        Some(tokio::spawn(async move {
            if let Err(e) =
                cronbot_gateway::serve(&addr, state, async move { shutdown.stopped().await }).await
            {
                error!(error = %e, "Operator interface failed");
            }
        }))
    } else {
        None
    };

    worker.run_daemon().await;

    if let Some(handle) = operator
        && let Err(e) = handle.await
    {
        warn!(error = %e, "Operator interface task ended abnormally");
    }
    println!("👋 CronBot stopped");
    Ok(())
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::PhaseChanged { from, to, .. } => debug!(%from, %to, "event: phase changed"),
        DomainEvent::ToolExecuted {
            tool_name,
            success,
            duration_ms,
            ..
        } => debug!(tool = %tool_name, success, duration_ms, "event: tool executed"),
        DomainEvent::BlockerDetected { kind, description, .. } => {
            info!(%kind, %description, "event: blocker detected")
        }
        DomainEvent::ApprovalRequested {
            approval_id,
            tool_name,
            ..
        } => info!(%approval_id, tool = %tool_name, "event: approval requested"),
        DomainEvent::ApprovalResolved {
            approval_id,
            approved,
            ..
        } => info!(%approval_id, approved, "event: approval resolved"),
        DomainEvent::CheckpointCreated {
            checkpoint_id,
            phase,
            ..
        } => debug!(%checkpoint_id, %phase, "event: checkpoint created"),
        DomainEvent::WorkCompleted {
            work_id, status, ..
        } => info!(%work_id, %status, "event: work finished"),
        DomainEvent::ErrorOccurred {
            context,
            error_message,
            ..
        } => warn!(%context, error = %error_message, "event: error"),
    }
}
