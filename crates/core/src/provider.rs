//! Reasoning oracle trait: the abstraction over the reasoning engine.
//!
//! The oracle receives the system prompt, the serialized worker context and
//! the tools on offer, and answers with either a final result or a list of
//! tool calls. Wire formats are the implementation's business.
//!
//! Implementations: Anthropic Messages API, scripted oracles in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::tool::{ToolCall, ToolDefinition};

/// A single reasoning request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    /// Instructions describing the worker's role and rules
    pub system_prompt: String,

    /// Serialized worker context plus the task payload
    pub context_payload: String,

    /// Tools the oracle may ask for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_tools: Vec<ToolDefinition>,

    /// Earlier rounds of this unit of work, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_rounds: Vec<ReasoningRound>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ReasoningRequest {
    pub fn new(system_prompt: impl Into<String>, context_payload: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            context_payload: context_payload.into(),
            available_tools: Vec::new(),
            prior_rounds: Vec::new(),
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.available_tools = tools;
        self
    }
}

/// One completed round: what the oracle asked for and what came back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningRound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_text: Option<String>,

    pub exchanges: Vec<ToolExchange>,
}

/// A tool call paired with the text result fed back to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The oracle's answer to one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningResponse {
    /// Final result text, if the oracle produced any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,

    /// Tool calls to dispatch, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ReasoningResponse {
    /// A response with a final result and no tool calls.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            final_text: Some(text.into()),
            ..Default::default()
        }
    }

    /// True when the oracle wants nothing more dispatched.
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// The core oracle trait.
///
/// The control loop calls `reason()` without knowing which backend answers.
/// Timeouts are enforced by the caller; implementations may add their own.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// A human-readable name for this oracle (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and wait for the terminal result or tool-call list.
    async fn reason(
        &self,
        request: ReasoningRequest,
    ) -> std::result::Result<ReasoningResponse, ProviderError>;

    /// Health check: can we reach the oracle?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_tools() {
        let req = ReasoningRequest::new("system", "{}").with_tools(vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }]);
        assert_eq!(req.available_tools.len(), 1);
        assert!(req.prior_rounds.is_empty());
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn text_response_is_final() {
        let resp = ReasoningResponse::text("done");
        assert!(resp.is_final());
        assert_eq!(resp.final_text.as_deref(), Some("done"));
    }

    #[test]
    fn usage_total() {
        let usage = Usage {
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn response_round_trips_tool_calls() {
        let resp = ReasoningResponse {
            final_text: None,
            tool_calls: vec![ToolCall {
                id: "toolu_1".into(),
                name: "write_file".into(),
                arguments: serde_json::json!({"path": "a.txt", "content": "x"}),
            }],
            usage: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: ReasoningResponse = serde_json::from_str(&json).unwrap();
        assert!(!back.is_final());
        assert_eq!(back.tool_calls[0].name, "write_file");
    }
}
