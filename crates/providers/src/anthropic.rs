//! Anthropic Messages API oracle.
//!
//! - `x-api-key` header authentication plus the `anthropic-version` header
//! - System prompt as a top-level field
//! - Native tool use: earlier rounds are replayed as `tool_use` blocks on the
//!   assistant side and `tool_result` blocks on the user side

use std::time::Duration;

use async_trait::async_trait;
use cronbot_core::error::ProviderError;
use cronbot_core::provider::{ReasoningOracle, ReasoningRequest, ReasoningResponse, Usage};
use cronbot_core::tool::{ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic-backed reasoning oracle.
pub struct AnthropicOracle {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicOracle {
    /// Create an oracle with the given key. The HTTP timeout bounds a single request.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = crate::http_client(timeout)
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client,
        })
    }

    /// Use a custom base URL (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the conversation: the context payload, then each prior round.
    fn to_api_messages(request: &ReasoningRequest) -> Vec<AnthropicMessage> {
        let mut messages = vec![AnthropicMessage {
            role: "user".into(),
            content: AnthropicContent::Text(request.context_payload.clone()),
        }];

        for round in &request.prior_rounds {
            let mut assistant_blocks = Vec::new();
            if let Some(text) = round.assistant_text.as_ref().filter(|t| !t.is_empty()) {
                assistant_blocks.push(ContentBlock::Text { text: text.clone() });
            }
            let mut results = Vec::new();
            for exchange in &round.exchanges {
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: exchange.call.id.clone(),
                    name: exchange.call.name.clone(),
                    input: exchange.call.arguments.clone(),
                });
                results.push(ContentBlock::ToolResult {
                    tool_use_id: exchange.call.id.clone(),
                    content: exchange.output.clone(),
                    is_error: exchange.is_error,
                });
            }

            if !assistant_blocks.is_empty() {
                messages.push(AnthropicMessage {
                    role: "assistant".into(),
                    content: AnthropicContent::Blocks(assistant_blocks),
                });
            }
            if !results.is_empty() {
                messages.push(AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Blocks(results),
                });
            }
        }

        messages
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn build_body(&self, request: &ReasoningRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "messages": Self::to_api_messages(request),
        });

        if !request.system_prompt.is_empty() {
            body["system"] = serde_json::json!(request.system_prompt);
        }
        if !request.available_tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.available_tools));
        }
        body
    }

    fn to_reasoning_response(resp: AnthropicResponse) -> ReasoningResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&t);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input,
                    });
                }
                ResponseContentBlock::Other => {}
            }
        }

        ReasoningResponse {
            final_text: (!text.is_empty()).then_some(text),
            tool_calls,
            usage: Some(Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            }),
        }
    }
}

/// Map a non-success status onto the oracle error taxonomy.
fn status_error(status: u16, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

#[async_trait]
impl ReasoningOracle for AnthropicOracle {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn reason(
        &self,
        request: ReasoningRequest,
    ) -> std::result::Result<ReasoningResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request);

        debug!(
            oracle = "anthropic",
            model = %self.model,
            rounds = request.prior_rounds.len(),
            tools = request.available_tools.len(),
            "Sending reasoning request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(status_error(status, error_body));
        }

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(Self::to_reasoning_response(api_resp))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // Anything but 401 means the key is accepted and the API is reachable
        Ok(response.status().as_u16() != 401)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking and any block type added later
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use cronbot_core::provider::{ReasoningRound, ToolExchange};

    fn oracle() -> AnthropicOracle {
        AnthropicOracle::new("sk-ant-test", Duration::from_secs(5)).unwrap()
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn constructor_with_base_url() {
        let oracle = oracle().with_base_url("https://custom.proxy.com/");
        assert_eq!(oracle.base_url, "https://custom.proxy.com");
        assert_eq!(oracle.model(), DEFAULT_MODEL);
        assert_eq!(oracle.name(), "anthropic");
    }

    #[test]
    fn body_carries_system_tools_and_payload() {
        let request = ReasoningRequest::new("You are a worker", "{\"task\":1}").with_tools(vec![
            ToolDefinition {
                name: "read_file".into(),
                description: "Read a file".into(),
                input_schema: serde_json::json!({"type": "object"}),
            },
        ]);
        let body = oracle().with_max_tokens(1024).build_body(&request);

        assert_eq!(body["system"], "You are a worker");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["tools"][0]["name"], "read_file");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "{\"task\":1}");
    }

    #[test]
    fn prior_rounds_become_tool_use_and_tool_result_blocks() {
        let mut request = ReasoningRequest::new("sys", "payload");
        request.prior_rounds.push(ReasoningRound {
            assistant_text: Some("Reading first".into()),
            exchanges: vec![ToolExchange {
                call: ToolCall {
                    id: "toolu_1".into(),
                    name: "read_file".into(),
                    arguments: serde_json::json!({"path": "README.md"}),
                },
                output: "Error: not found".into(),
                is_error: true,
            }],
        });

        let body = oracle().build_body(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);

        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "text");
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["input"]["path"], "README.md");

        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(messages[2]["content"][0]["is_error"], true);
    }

    #[test]
    fn response_parsing_splits_text_and_tool_calls() {
        let raw = serde_json::json!({
            "id": "msg_1",
            "model": "claude",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Plan:"},
                {"type": "tool_use", "id": "toolu_9", "name": "write_file", "input": {"path": "a.rs"}},
            ],
            "usage": {"input_tokens": 120, "output_tokens": 30},
        });
        let resp: AnthropicResponse = serde_json::from_value(raw).unwrap();
        let parsed = AnthropicOracle::to_reasoning_response(resp);

        assert_eq!(parsed.final_text.as_deref(), Some("Plan:"));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "write_file");
        assert!(!parsed.is_final());
        assert_eq!(parsed.usage.unwrap().total(), 150);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            status_error(401, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        let server = status_error(529, "overloaded".into());
        assert!(server.is_transient());
    }

    #[tokio::test]
    async fn reason_against_local_server() {
        let app = Router::new().route(
            "/v1/messages",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["model"], DEFAULT_MODEL);
                Json(serde_json::json!({
                    "content": [{"type": "text", "text": "done"}],
                    "usage": {"input_tokens": 10, "output_tokens": 2},
                }))
            }),
        );
        let base = serve(app).await;

        let resp = oracle()
            .with_base_url(base)
            .reason(ReasoningRequest::new("sys", "payload"))
            .await
            .unwrap();
        assert_eq!(resp.final_text.as_deref(), Some("done"));
        assert!(resp.is_final());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_failed() {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = serve(app).await;

        let err = oracle()
            .with_base_url(base)
            .reason(ReasoningRequest::new("sys", "payload"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert!(!err.is_transient());
    }
}
