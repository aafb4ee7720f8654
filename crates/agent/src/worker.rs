//! The worker control loop.
//!
//! One iteration:
//!
//! 1. **Blocker check**: a detected blocker is surfaced, the loop cools
//!    down and the failure state behind it is cleared.
//! 2. **Claim**: ask the work source for the next unit; sleep a poll
//!    interval when there is none.
//! 3. **Execute**: plan, checkpoint, reason with the oracle (dispatching
//!    tool calls between rounds), verify, report the outcome.
//! 4. **Recover**: any failure in step 3 is logged, journaled and
//!    checkpointed, then the loop backs off and carries on.
//!
//! The loop only ends when its [`StopHandle`] is triggered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use cronbot_config::{AppConfig, RetryConfig};
use cronbot_core::agent::{FailureReset, WorkerState, WorkerStatus};
use cronbot_core::blocker::Blocker;
use cronbot_core::context::Phase;
use cronbot_core::error::{Error, ProviderError, StateError};
use cronbot_core::event::{DomainEvent, EventBus};
use cronbot_core::provider::{
    ReasoningOracle, ReasoningRequest, ReasoningResponse, ReasoningRound, ToolExchange, Usage,
};
use cronbot_core::tool::{ToolCall, ToolDefinition, ToolOutcome};
use cronbot_core::work::{UnitOfWork, WorkFilter, WorkSource, WorkStatus};
use cronbot_state::{Checkpoint, JournalKind, LoadOutcome, StateStore};
use cronbot_tools::CapabilityRegistry;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::blocker::{BlockerHistories, ContentHasher};
use crate::prompt;
use crate::stop::StopHandle;

/// Longest final-result excerpt kept as a decision rationale.
const RATIONALE_CHARS: usize = 500;

/// Loop timings and tool classification for one worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub project_id: Option<String>,
    pub poll_interval: Duration,
    pub blocker_cooldown: Duration,
    pub error_backoff: Duration,
    pub max_reasoning_rounds: u32,
    pub reasoning_timeout: Duration,
    /// Per-response token cap passed to the oracle
    pub max_tokens: Option<u32>,
    pub retry: RetryConfig,
    /// Tools whose successful calls are fingerprinted for code-loop detection
    pub file_edit_tools: Vec<String>,
    /// Tools whose results count as verification records
    pub verification_tools: Vec<String>,
}

impl WorkerSettings {
    pub fn new(worker_id: impl Into<String>) -> Self {
        let mut settings = Self::from_config(&AppConfig::default());
        settings.worker_id = worker_id.into();
        settings
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let timings = &config.control_loop;
        Self {
            worker_id: config.agent_id_or_default().to_string(),
            project_id: config.worker.project_id.clone(),
            poll_interval: Duration::from_secs(timings.poll_interval_secs),
            blocker_cooldown: Duration::from_secs(timings.blocker_cooldown_secs),
            error_backoff: Duration::from_secs(timings.error_backoff_secs),
            max_reasoning_rounds: timings.max_reasoning_rounds,
            reasoning_timeout: Duration::from_secs(timings.reasoning_timeout_secs),
            max_tokens: Some(config.oracle.max_tokens),
            retry: config.retry.clone(),
            file_edit_tools: config.tools.file_edit_tools.clone(),
            verification_tools: config.tools.verification_tools.clone(),
        }
    }

    fn is_file_edit(&self, tool: &str) -> bool {
        self.file_edit_tools.iter().any(|t| t == tool)
    }

    fn is_verification(&self, tool: &str) -> bool {
        self.verification_tools.iter().any(|t| t == tool)
    }
}

/// What a single loop iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum Iteration {
    /// A blocker was surfaced and the cooldown served
    Blocked(Blocker),
    /// Nothing to claim; the poll interval was served
    Idle,
    Completed { work_id: String },
    /// The unit failed; the error backoff was served
    Failed { work_id: String, error: String },
}

pub struct Worker {
    settings: WorkerSettings,
    store: StateStore,
    load_outcome: LoadOutcome,
    registry: Arc<CapabilityRegistry>,
    oracle: Arc<dyn ReasoningOracle>,
    work_source: Arc<dyn WorkSource>,
    histories: BlockerHistories,
    events: Arc<EventBus>,
    status: watch::Sender<WorkerStatus>,
    stop: StopHandle,
    failure_reset: FailureReset,
    initialized: bool,
}

impl Worker {
    pub fn new(
        settings: WorkerSettings,
        store: StateStore,
        load_outcome: LoadOutcome,
        registry: Arc<CapabilityRegistry>,
        oracle: Arc<dyn ReasoningOracle>,
        work_source: Arc<dyn WorkSource>,
    ) -> Self {
        let mut status = WorkerStatus::new(settings.worker_id.clone());
        status.phase = store.phase();
        let (status, _) = watch::channel(status);

        Self {
            settings,
            store,
            load_outcome,
            registry,
            oracle,
            work_source,
            histories: BlockerHistories::default(),
            events: Arc::new(EventBus::default()),
            status,
            stop: StopHandle::new(),
            failure_reset: FailureReset::new(),
            initialized: false,
        }
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_hasher(mut self, hasher: Box<dyn ContentHasher>) -> Self {
        self.histories = BlockerHistories::new(hasher);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Handle an operator uses to clear the tool-failure tallies.
    pub fn failure_reset_handle(&self) -> FailureReset {
        self.failure_reset.clone()
    }

    /// Live status snapshots for operator surfaces.
    pub fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn histories(&self) -> &BlockerHistories {
        &self.histories
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Startup recovery, then `ReadingContext`.
    ///
    /// When the persisted context was missing or unreadable, the latest
    /// checkpoint (if any) is restored first. Runs once.
    pub async fn initialize(&mut self) -> Result<(), StateError> {
        if self.initialized {
            return Ok(());
        }

        if self.load_outcome != LoadOutcome::Loaded {
            match self.store.latest_checkpoint().await {
                Ok(Some(checkpoint)) => {
                    if self.store.restore_checkpoint(&checkpoint.id).await? {
                        info!(
                            worker_id = %self.settings.worker_id,
                            checkpoint_id = %checkpoint.id,
                            "Restored latest checkpoint"
                        );
                        self.store
                            .append_journal(
                                JournalKind::Checkpoint,
                                format!("Restored checkpoint {}", checkpoint.id),
                                None,
                            )
                            .await?;
                    }
                }
                Ok(None) => debug!("No checkpoint to restore, starting fresh"),
                Err(e) => warn!(error = %e, "Could not read checkpoints, starting fresh"),
            }
        }

        self.enter_phase(Phase::ReadingContext).await?;
        self.initialized = true;
        info!(
            worker_id = %self.settings.worker_id,
            load_outcome = ?self.load_outcome,
            "Worker initialized"
        );
        Ok(())
    }

    /// Run until the stop handle fires, then checkpoint and disconnect.
    pub async fn run_daemon(&mut self) {
        info!(worker_id = %self.settings.worker_id, "Starting worker loop");
        if let Err(e) = self.initialize().await {
            error!(error = %e, "Worker initialization failed, continuing with in-memory state");
        }

        while !self.stop.is_stopped() {
            let iteration = self.run_iteration().await;
            debug!(?iteration, "Iteration finished");
        }

        self.shutdown().await;
    }

    /// One pass through the loop. Never returns an error: failures are
    /// handled inside and reported in the result.
    pub async fn run_iteration(&mut self) -> Iteration {
        if self.failure_reset.take() {
            self.clear_tool_failures().await;
        }

        if let Some(blocker) = self.histories.detect() {
            self.handle_blocker(&blocker).await;
            return Iteration::Blocked(blocker);
        }

        let filter = WorkFilter {
            worker_id: self.settings.worker_id.clone(),
            project_id: self.settings.project_id.clone(),
        };
        let claimed = match self.work_source.claim_next(&filter).await {
            Ok(unit) => unit,
            Err(e) => {
                warn!(error = %e, "Failed to claim next unit of work");
                None
            }
        };

        let Some(unit) = claimed else {
            self.idle().await;
            return Iteration::Idle;
        };

        match self.execute_unit(&unit).await {
            Ok(()) => Iteration::Completed { work_id: unit.id },
            Err(e) => {
                let message = e.to_string();
                self.handle_failure(&unit, e).await;
                Iteration::Failed {
                    work_id: unit.id,
                    error: message,
                }
            }
        }
    }

    async fn idle(&mut self) {
        best_effort(self.enter_phase(Phase::ReadingContext).await, "enter reading_context");
        self.update_status(|s| {
            s.state = WorkerState::Idle;
            s.current_work_id = None;
        });
        debug!(
            poll_secs = self.settings.poll_interval.as_secs(),
            "No work available, waiting"
        );
        self.stop.sleep(self.settings.poll_interval).await;
    }

    async fn clear_tool_failures(&mut self) {
        self.histories.clear_tool_failures();
        info!(worker_id = %self.settings.worker_id, "Tool failure tallies cleared by operator");
        best_effort(
            self.store
                .append_journal(
                    JournalKind::Decision,
                    "Operator cleared the tool failure tallies",
                    None,
                )
                .await,
            "journal failure reset",
        );
    }

    async fn handle_blocker(&mut self, blocker: &Blocker) {
        warn!(
            worker_id = %self.settings.worker_id,
            kind = %blocker.kind,
            severity = %blocker.severity,
            description = %blocker.description,
            "Blocker detected"
        );
        self.update_status(|s| {
            s.state = WorkerState::Blocked;
            s.last_blocker = Some(blocker.clone());
        });
        best_effort(self.enter_phase(Phase::Blocked).await, "enter blocked");
        best_effort(
            self.store
                .append_journal(
                    JournalKind::Blocker,
                    blocker.description.clone(),
                    serde_json::to_value(blocker).ok(),
                )
                .await,
            "journal blocker",
        );
        self.events.publish(DomainEvent::BlockerDetected {
            kind: blocker.kind,
            description: blocker.description.clone(),
            timestamp: Utc::now(),
        });

        if let Err(e) = self
            .work_source
            .report_blocker(&self.settings.worker_id, blocker)
            .await
        {
            warn!(error = %e, "Failed to report blocker");
        }

        self.stop.sleep(self.settings.blocker_cooldown).await;
        self.histories.reset_after(blocker);
        self.update_status(|s| s.state = WorkerState::Idle);
    }

    async fn execute_unit(&mut self, unit: &UnitOfWork) -> Result<(), Error> {
        info!(
            worker_id = %self.settings.worker_id,
            work_id = %unit.id,
            title = %unit.title,
            "Executing unit of work"
        );
        self.update_status(|s| {
            s.state = WorkerState::Working;
            s.current_work_id = Some(unit.id.clone());
        });

        self.enter_phase(Phase::Planning).await?;
        self.store
            .record_decision(format!("Started task: {}", unit.title), None, 5)
            .await?;
        self.store
            .append_journal(
                JournalKind::TaskStart,
                unit.title.clone(),
                Some(serde_json::json!({ "work_id": unit.id })),
            )
            .await?;
        self.report(&unit.id, WorkStatus::InProgress, "").await;
        self.checkpoint(None).await?;

        self.enter_phase(Phase::Executing).await?;
        let tools = self.registry.tool_definitions().await;
        let level = self.registry.autonomy_level().await;
        let system = prompt::system_prompt(level);
        let payload = prompt::context_payload(self.store.context(), unit, &tools);
        let result = self.reason(&system, &payload, tools).await?;

        self.enter_phase(Phase::Verifying).await?;
        let rationale = result.as_deref().map(|text| excerpt(text, RATIONALE_CHARS));
        self.store
            .record_decision(format!("Completed task: {}", unit.title), rationale, 7)
            .await?;
        self.store
            .append_journal(
                JournalKind::TaskComplete,
                unit.title.clone(),
                Some(serde_json::json!({ "work_id": unit.id })),
            )
            .await?;

        self.enter_phase(Phase::Committing).await?;
        self.report(&unit.id, WorkStatus::Done, result.as_deref().unwrap_or(""))
            .await;
        self.enter_phase(Phase::Completed).await?;
        self.store.clear_active_files().await?;

        self.events.publish(DomainEvent::WorkCompleted {
            work_id: unit.id.clone(),
            status: WorkStatus::Done,
            timestamp: Utc::now(),
        });
        self.update_status(|s| {
            s.completed += 1;
            s.current_work_id = None;
            s.state = WorkerState::Idle;
        });
        info!(work_id = %unit.id, "Unit of work completed");
        Ok(())
    }

    /// Ask the oracle, dispatching tool calls between rounds, until it
    /// returns a final result or the round limit is hit.
    async fn reason(
        &mut self,
        system: &str,
        payload: &str,
        tools: Vec<ToolDefinition>,
    ) -> Result<Option<String>, Error> {
        let mut rounds: Vec<ReasoningRound> = Vec::new();

        for round in 0..self.settings.max_reasoning_rounds {
            let mut request = ReasoningRequest::new(system, payload).with_tools(tools.clone());
            request.prior_rounds = rounds.clone();
            request.max_tokens = self.settings.max_tokens;

            let response = self.reason_with_retry(request).await?;
            self.account_tokens(response.usage).await?;

            if response.is_final() {
                debug!(round, "Oracle returned a final result");
                return Ok(response.final_text);
            }

            debug!(round, calls = response.tool_calls.len(), "Dispatching tool calls");
            let exchanges = self.dispatch(&response.tool_calls).await?;
            rounds.push(ReasoningRound {
                assistant_text: response.final_text,
                exchanges,
            });
        }

        warn!(
            max_rounds = self.settings.max_reasoning_rounds,
            "Reasoning round limit reached"
        );
        self.store
            .record_decision(
                format!(
                    "Stopped after {} reasoning rounds",
                    self.settings.max_reasoning_rounds
                ),
                None,
                6,
            )
            .await?;
        Ok(None)
    }

    /// One oracle call with the timeout, retrying transient failures with
    /// exponential backoff up to `retry.max_attempts` attempts.
    async fn reason_with_retry(
        &self,
        request: ReasoningRequest,
    ) -> Result<ReasoningResponse, ProviderError> {
        let attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(
                self.settings.reasoning_timeout,
                self.oracle.reason(request.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "{} did not answer within {}s",
                    self.oracle.name(),
                    self.settings.reasoning_timeout.as_secs()
                ))),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.settings.retry.delay_for(attempt);
                    warn!(
                        oracle = self.oracle.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient oracle failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn account_tokens(&mut self, usage: Option<Usage>) -> Result<(), StateError> {
        let Some(usage) = usage else {
            return Ok(());
        };
        self.store.add_tokens(usage.total()).await?;
        if self.store.needs_compaction() {
            let ctx = self.store.context();
            info!(
                token_count = ctx.token_count,
                token_budget = ctx.token_budget,
                "Token budget nearly exhausted, compacting context"
            );
            self.store.compact_context().await?;
        }
        Ok(())
    }

    /// Route every call through the registry and collect what to feed back.
    async fn dispatch(&mut self, calls: &[ToolCall]) -> Result<Vec<ToolExchange>, Error> {
        let mut exchanges = Vec::with_capacity(calls.len());

        for call in calls {
            info!(tool = %call.name, "Processing tool call");
            let started = Instant::now();
            let outcome = self
                .registry
                .call_tool(&call.name, call.arguments.clone())
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let (output, is_error) = match &outcome {
                ToolOutcome::RequiresApproval { reason } => {
                    let approval_id = self
                        .registry
                        .request_approval(&call.name, call.arguments.clone(), reason.clone())
                        .await;
                    self.store
                        .record_decision(
                            format!("Requested approval for {}", call.name),
                            Some(reason.clone()),
                            6,
                        )
                        .await?;
                    self.store
                        .append_journal(
                            JournalKind::Approval,
                            format!("Approval {approval_id} requested for {}", call.name),
                            Some(serde_json::json!({
                                "approval_id": approval_id,
                                "tool": call.name,
                            })),
                        )
                        .await?;
                    exchanges.push(ToolExchange {
                        call: call.clone(),
                        output: format!(
                            "Pending operator approval (id {approval_id}): {reason}. Do not retry this call."
                        ),
                        is_error: false,
                    });
                    continue;
                }
                ToolOutcome::Success { output, .. } => (output.clone(), false),
                ToolOutcome::Failure { .. } => (outcome.summary(), true),
            };

            let success = !is_error;
            self.histories.record_tool_result(&call.name, success);
            if self.settings.is_verification(&call.name) {
                self.histories.record_verification(success, output.clone());
            }
            if success
                && self.settings.is_file_edit(&call.name)
                && let Some((path, content)) = edited_file(&call.arguments)
            {
                self.histories.record_file_edit(&path, &content);
                self.store.add_active_file(path).await?;
            }
            if is_error {
                warn!(tool = %call.name, error = %output, "Tool call failed");
            }

            self.events.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success,
                duration_ms,
                timestamp: Utc::now(),
            });
            exchanges.push(ToolExchange {
                call: call.clone(),
                output,
                is_error,
            });
        }

        Ok(exchanges)
    }

    async fn handle_failure(&mut self, unit: &UnitOfWork, err: Error) {
        let class = err.class();
        let message = err.to_string();
        error!(
            worker_id = %self.settings.worker_id,
            work_id = %unit.id,
            error_kind = err.kind(),
            error_class = %class,
            error = %message,
            "Unit of work failed"
        );
        self.update_status(|s| {
            s.state = WorkerState::Error;
            s.failed += 1;
        });

        best_effort(
            self.store
                .record_decision(format!("Task failed: {message}"), None, 3)
                .await,
            "record failure",
        );
        best_effort(
            self.store
                .append_journal(
                    JournalKind::Error,
                    message.clone(),
                    Some(serde_json::json!({
                        "work_id": unit.id,
                        "kind": err.kind(),
                        "class": class.as_str(),
                    })),
                )
                .await,
            "journal failure",
        );
        best_effort(self.enter_phase(Phase::Error).await, "enter error");

        self.events.publish(DomainEvent::ErrorOccurred {
            context: format!("work {}", unit.id),
            error_message: message.clone(),
            timestamp: Utc::now(),
        });
        self.report(&unit.id, WorkStatus::Blocked, &message).await;
        self.events.publish(DomainEvent::WorkCompleted {
            work_id: unit.id.clone(),
            status: WorkStatus::Blocked,
            timestamp: Utc::now(),
        });

        let recovery = serde_json::json!({ "work_id": unit.id, "error": message });
        best_effort(
            self.checkpoint(Some(recovery)).await.map(drop),
            "recovery checkpoint",
        );

        self.stop.sleep(self.settings.error_backoff).await;
        self.update_status(|s| {
            s.state = WorkerState::Idle;
            s.current_work_id = None;
        });
    }

    async fn shutdown(&mut self) {
        info!(worker_id = %self.settings.worker_id, "Stopping worker");
        best_effort(self.checkpoint(None).await.map(drop), "final checkpoint");
        self.registry.disconnect_all().await;
        self.update_status(|s| {
            s.state = WorkerState::Terminated;
            s.current_work_id = None;
        });
        info!(worker_id = %self.settings.worker_id, "Worker stopped");
    }

    async fn checkpoint(
        &mut self,
        last_result: Option<serde_json::Value>,
    ) -> Result<Checkpoint, StateError> {
        let checkpoint = self.store.create_checkpoint(last_result).await?;
        self.store
            .append_journal(
                JournalKind::Checkpoint,
                format!("Checkpoint {}", checkpoint.id),
                None,
            )
            .await?;
        self.events.publish(DomainEvent::CheckpointCreated {
            checkpoint_id: checkpoint.id.clone(),
            phase: checkpoint.phase,
            timestamp: Utc::now(),
        });
        Ok(checkpoint)
    }

    async fn enter_phase(&mut self, phase: Phase) -> Result<(), StateError> {
        let from = self.store.phase();
        self.store.set_phase(phase).await?;
        if from != phase {
            debug!(from = %from, to = %phase, "Phase changed");
            self.events.publish(DomainEvent::PhaseChanged {
                from,
                to: phase,
                timestamp: Utc::now(),
            });
        }
        self.update_status(|s| s.phase = phase);
        Ok(())
    }

    async fn report(&self, work_id: &str, status: WorkStatus, detail: &str) {
        if let Err(e) = self
            .work_source
            .report_outcome(work_id, status, detail)
            .await
        {
            warn!(work_id, status = %status, error = %e, "Failed to report work status");
        }
    }

    fn update_status(&self, update: impl FnOnce(&mut WorkerStatus)) {
        self.status.send_modify(|status| {
            update(status);
            status.updated_at = Utc::now();
        });
    }
}

fn best_effort(result: Result<(), StateError>, action: &str) {
    if let Err(e) = result {
        warn!(action, error = %e, "State update failed");
    }
}

/// The path and content a file-editing call wrote, for fingerprinting.
///
/// Falls back to the canonical JSON of the arguments when there is no
/// string `content` field.
fn edited_file(arguments: &serde_json::Value) -> Option<(String, Vec<u8>)> {
    let path = arguments.get("path")?.as_str()?.to_string();
    let content = match arguments.get("content").and_then(|c| c.as_str()) {
        Some(text) => text.as_bytes().to_vec(),
        None => serde_json::to_vec(arguments).ok()?,
    };
    Some((path, content))
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
