//! Security module for CronBot: the autonomy-gated approval policy,
//! workspace path sandboxing, and audit logging.
//!
//! Provides:
//! - **Approval policy**: which tool calls need an operator at which autonomy level
//! - **Path validation**: built-in file tools stay inside the workspace
//! - **Audit logging**: structured record of every gate decision

pub mod approval;
pub mod audit;
pub mod path;

pub use approval::{ApprovalDecision, ApprovalPolicy, ToolCategory};
pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use path::{PathValidationError, resolve_in_workspace};
