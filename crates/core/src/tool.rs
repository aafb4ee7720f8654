//! Tool abstractions: what the worker can do, and who provides it.
//!
//! A [`ToolProvider`] is a source of tools (an MCP server, an in-process
//! set). A [`Tool`] is a single in-process capability that a local provider
//! can serve. Every dispatched call resolves into a [`ToolOutcome`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// A tool definition sent to the oracle so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub input_schema: serde_json::Value,
}

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the oracle's tool-use id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// What a provider returns from `invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (or the error text when `success` is false)
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Result of routing a call through the capability registry.
///
/// "Needs approval" is a third outcome rather than an error, so every caller
/// has to handle it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Failure {
        error: String,
        #[serde(skip)]
        cause: Option<ToolError>,
    },
    RequiresApproval {
        reason: String,
    },
}

impl ToolOutcome {
    pub fn failure(error: ToolError) -> Self {
        ToolOutcome::Failure {
            error: error.to_string(),
            cause: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    pub fn requires_approval(&self) -> bool {
        matches!(self, ToolOutcome::RequiresApproval { .. })
    }

    /// Text handed back to the oracle for this outcome.
    pub fn summary(&self) -> String {
        match self {
            ToolOutcome::Success { output, .. } => output.clone(),
            ToolOutcome::Failure { error, .. } => format!("Error: {error}"),
            ToolOutcome::RequiresApproval { reason } => format!("Requires approval: {reason}"),
        }
    }
}

impl From<ToolResult> for ToolOutcome {
    fn from(result: ToolResult) -> Self {
        if result.success {
            ToolOutcome::Success {
                output: result.output,
                data: result.data,
            }
        } else {
            ToolOutcome::Failure {
                error: result.output,
                cause: None,
            }
        }
    }
}

/// A source of callable tools.
///
/// Connection handshakes are provider-specific; the registry only calls
/// `connect` once on registration and `disconnect` on removal.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Establish the connection. In-process providers need nothing.
    async fn connect(&self) -> std::result::Result<(), ToolError> {
        Ok(())
    }

    /// The tools this provider declares.
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDefinition>, ToolError>;

    /// Execute one tool.
    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;

    async fn disconnect(&self) -> std::result::Result<(), ToolError> {
        Ok(())
    }
}

/// A single in-process tool.
///
/// Built-in tools implement this trait and are served by a local provider.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the oracle).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for the oracle.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}
