//! # CronBot Core
//!
//! Domain types, traits, and error definitions for the CronBot worker runtime.
//! This crate performs **no I/O**. It defines the domain model that the
//! state store, capability registry, and control loop implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`ToolProvider`]: a source of callable tools (MCP server, in-process set)
//! - [`ReasoningOracle`]: the reasoning engine that plans and requests tool calls
//! - [`WorkSource`]: where units of work are claimed and reported
//!
//! Implementations live in their respective crates, so the control loop can
//! be exercised end to end with scripted test doubles.

pub mod agent;
pub mod blocker;
pub mod context;
pub mod error;
pub mod event;
pub mod provider;
pub mod tool;
pub mod work;

// Re-export key types at crate root for ergonomics
pub use agent::{AutonomyLevel, FailureReset, WorkerState, WorkerStatus};
pub use blocker::{Blocker, BlockerKind, Severity};
pub use context::{Decision, Phase, WorkerContext};
pub use error::{Error, ErrorClass, Result};
pub use event::{DomainEvent, EventBus};
pub use provider::{
    ReasoningOracle, ReasoningRequest, ReasoningResponse, ReasoningRound, ToolExchange, Usage,
};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolOutcome, ToolProvider, ToolResult};
pub use work::{UnitOfWork, WorkFilter, WorkSource, WorkStatus};
