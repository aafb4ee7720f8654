//! Operator interface for a running CronBot worker.
//!
//! Endpoints:
//!
//! - `GET  /health` liveness check
//! - `GET  /status` worker phase, state and current work id
//! - `GET  /approvals` pending approvals, oldest first
//! - `POST /approvals/{id}/approve` executes a parked call
//! - `POST /approvals/{id}/reject` discards a parked call
//! - `GET  /tools` aggregate tool list
//! - `GET|PUT /autonomy` reads or changes the autonomy level
//! - `POST /failures/clear` asks the worker to clear its tool-failure tallies
//!
//! Built on Axum; the registry is shared with the worker, the status comes
//! from the worker's watch channel.

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use cronbot_core::agent::{AutonomyLevel, FailureReset, WorkerStatus};
use cronbot_core::error::ToolError;
use cronbot_core::tool::ToolOutcome;
use cronbot_tools::{CapabilityRegistry, PendingApproval, RegisteredTool};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Shared state for the operator routes.
pub struct OperatorState {
    pub registry: Arc<CapabilityRegistry>,
    pub status: watch::Receiver<WorkerStatus>,
    /// Absent when no worker is attached to take the request
    pub failure_reset: Option<FailureReset>,
    pub start_time: DateTime<Utc>,
}

impl OperatorState {
    pub fn new(registry: Arc<CapabilityRegistry>, status: watch::Receiver<WorkerStatus>) -> Self {
        Self {
            registry,
            status,
            failure_reset: None,
            start_time: Utc::now(),
        }
    }

    pub fn with_failure_reset(mut self, reset: FailureReset) -> Self {
        self.failure_reset = Some(reset);
        self
    }
}

pub type SharedState = Arc<OperatorState>;

/// Build the router with every operator route.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/approvals", get(list_approvals_handler))
        .route("/approvals/{id}/approve", post(approve_handler))
        .route("/approvals/{id}/reject", post(reject_handler))
        .route("/tools", get(list_tools_handler))
        .route(
            "/autonomy",
            get(get_autonomy_handler).put(set_autonomy_handler),
        )
        .route("/failures/clear", post(clear_failures_handler))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the operator interface on `addr` until `shutdown` resolves.
pub async fn serve<F>(
    addr: &str,
    state: SharedState,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Operator interface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Operator interface stopped");
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime = Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: uptime,
    })
}

#[derive(Serialize, Deserialize)]
struct StatusResponse {
    #[serde(flatten)]
    worker: WorkerStatus,
    autonomy: AutonomyLevel,
    pending_approvals: usize,
}

async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    let worker = state.status.borrow().clone();
    Json(StatusResponse {
        worker,
        autonomy: state.registry.autonomy_level().await,
        pending_approvals: state.registry.pending_approvals().await.len(),
    })
}

#[derive(Serialize, Deserialize)]
struct ApprovalListResponse {
    approvals: Vec<PendingApproval>,
    count: usize,
}

async fn list_approvals_handler(State(state): State<SharedState>) -> Json<ApprovalListResponse> {
    let approvals = state.registry.pending_approvals().await;
    let count = approvals.len();
    Json(ApprovalListResponse { approvals, count })
}

#[derive(Serialize, Deserialize)]
struct ResolutionResponse {
    approval_id: String,
    #[serde(flatten)]
    outcome: ToolOutcome,
}

/// Map an approve/reject outcome to a response; an unknown id is a 404.
fn resolution(
    approval_id: String,
    outcome: ToolOutcome,
) -> Result<Json<ResolutionResponse>, StatusCode> {
    if let ToolOutcome::Failure {
        cause: Some(ToolError::ApprovalNotFound(_)),
        ..
    } = &outcome
    {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(ResolutionResponse {
        approval_id,
        outcome,
    }))
}

async fn approve_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ResolutionResponse>, StatusCode> {
    let outcome = state.registry.approve_operation(&id).await;
    resolution(id, outcome)
}

async fn reject_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ResolutionResponse>, StatusCode> {
    let outcome = state.registry.reject_operation(&id).await;
    resolution(id, outcome)
}

#[derive(Serialize, Deserialize)]
struct ToolListResponse {
    tools: Vec<RegisteredTool>,
    count: usize,
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools = state.registry.all_tools().await;
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

#[derive(Serialize, Deserialize)]
struct AutonomyBody {
    level: AutonomyLevel,
}

#[derive(Serialize, Deserialize)]
struct AutonomyResponse {
    level: AutonomyLevel,
    tier: u8,
    description: String,
}

impl From<AutonomyLevel> for AutonomyResponse {
    fn from(level: AutonomyLevel) -> Self {
        Self {
            level,
            tier: level.tier(),
            description: level.description().into(),
        }
    }
}

async fn get_autonomy_handler(State(state): State<SharedState>) -> Json<AutonomyResponse> {
    Json(state.registry.autonomy_level().await.into())
}

async fn set_autonomy_handler(
    State(state): State<SharedState>,
    Json(body): Json<AutonomyBody>,
) -> Json<AutonomyResponse> {
    state.registry.set_autonomy_level(body.level).await;
    Json(body.level.into())
}

#[derive(Serialize, Deserialize)]
struct ClearFailuresResponse {
    requested: bool,
}

/// The worker applies the clear at the start of its next iteration.
async fn clear_failures_handler(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<ClearFailuresResponse>), StatusCode> {
    let reset = state
        .failure_reset
        .as_ref()
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    reset.request();
    info!("Operator requested a tool failure reset");
    Ok((
        StatusCode::ACCEPTED,
        Json(ClearFailuresResponse { requested: true }),
    ))
}
