//! Anthropic (Claude) oracle with native tool use

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{NoesisError, Result};
use crate::llm::{
    LLMProvider, LLMRequest, LLMResponse, Message, MessageRole, ModelInfo, TokenUsage, ToolCall,
};

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Model used when neither config nor environment names one
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Name of the synthetic tool used to force structured answers
const STRUCTURED_TOOL: &str = "structured_answer";

/// Anthropic (Claude) LLM provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    default_max_tokens: usize,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g., "claude-sonnet-4-5-20250929")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Create with a custom base URL.
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_max_tokens: 4096,
        }
    }

    /// Create from environment variables.
    ///
    /// Reads `ANTHROPIC_API_KEY` (required), `ANTHROPIC_MODEL` and
    /// `ANTHROPIC_BASE_URL`. An explicit `model` wins over the environment.
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            NoesisError::Configuration("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;

        let model = model
            .map(|m| m.into())
            .or_else(|| std::env::var("ANTHROPIC_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self::with_base_url(api_key, model, base_url))
    }

    /// Bound every HTTP round trip; per-call timeouts belong to the transport.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NoesisError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(self)
    }

    /// Token limit used when a request does not set one
    pub fn with_default_max_tokens(mut self, max_tokens: usize) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, request: &LLMRequest) -> AnthropicRequest {
        let (system, messages) = convert_messages(&request.messages);
        AnthropicRequest {
            model: self.model.clone(),
            messages,
            system,
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            temperature: request.temperature,
            stop_sequences: if request.stop_sequences.is_empty() {
                None
            } else {
                Some(request.stop_sequences.clone())
            },
            tools: request
                .tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect(),
            tool_choice: None,
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<AnthropicResponse> {
        let url = format!("{}/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                // Connection failures and timeouts are worth another try
                NoesisError::OracleTransient(format!("Failed to reach Anthropic: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let detail = match serde_json::from_str::<AnthropicError>(&text) {
                Ok(error) => format!("{}: {}", error.error.error_type, error.error.message),
                Err(_) => text,
            };
            return Err(classify_status(status.as_u16(), detail));
        }

        response.json().await.map_err(|e| {
            NoesisError::MalformedOutput(format!("Failed to parse Anthropic response: {}", e))
        })
    }
}

fn classify_status(status: u16, detail: String) -> NoesisError {
    // 529: overloaded
    if matches!(status, 408 | 429 | 500 | 502 | 503 | 504 | 529) {
        NoesisError::OracleTransient(format!("Anthropic API error ({}): {}", status, detail))
    } else {
        NoesisError::OracleHard(format!("Anthropic API error ({}): {}", status, detail))
    }
}

/// Anthropic API request format
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

/// Anthropic API response format
#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: usize,
    output_tokens: usize,
}

/// Anthropic error response
#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Convert messages to Anthropic format, extracting the system prompt.
///
/// Consecutive tool results are folded into one user message, which is how
/// the Messages API expects answers to a multi-tool turn.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_prompt = None;
    let mut converted: Vec<AnthropicMessage> = Vec::new();

    for msg in messages {
        match msg.role {
            MessageRole::System => {
                system_prompt = Some(msg.content.clone());
            }
            MessageRole::User => {
                converted.push(AnthropicMessage {
                    role: "user",
                    content: vec![ContentBlock::Text {
                        text: msg.content.clone(),
                    }],
                });
            }
            MessageRole::Assistant => {
                let mut content = Vec::new();
                if !msg.content.is_empty() {
                    content.push(ContentBlock::Text {
                        text: msg.content.clone(),
                    });
                }
                content.extend(msg.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                converted.push(AnthropicMessage {
                    role: "assistant",
                    content,
                });
            }
            MessageRole::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.content.clone(),
                    is_error: msg.is_error,
                };
                let follows_results = converted.last().is_some_and(|last| {
                    last.role == "user"
                        && matches!(last.content.first(), Some(ContentBlock::ToolResult { .. }))
                });
                match converted.last_mut() {
                    Some(last) if follows_results => last.content.push(block),
                    _ => converted.push(AnthropicMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
        }
    }

    (system_prompt, converted)
}

fn convert_response(response: AnthropicResponse) -> LLMResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text } => content.push_str(&text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input));
            }
            ContentBlock::ToolResult { .. } | ContentBlock::Unsupported => {}
        }
    }

    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
    });

    LLMResponse {
        content,
        tool_calls,
        stop_reason: response.stop_reason,
        usage,
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let body = self.build_request(request);
        let response = self.send(&body).await?;
        Ok(convert_response(response))
    }

    /// Forced choice through a single synthetic tool whose input schema is
    /// the target schema.
    async fn generate_structured(&self, request: &LLMRequest, schema: &Value) -> Result<Value> {
        let mut body = self.build_request(request);
        body.tools = vec![AnthropicTool {
            name: STRUCTURED_TOOL.to_string(),
            description: "Record the structured answer".to_string(),
            input_schema: schema.clone(),
        }];
        body.tool_choice = Some(serde_json::json!({"type": "tool", "name": STRUCTURED_TOOL}));

        let response = self.send(&body).await?;
        response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { name, input, .. } if name == STRUCTURED_TOOL => Some(input),
                _ => None,
            })
            .ok_or_else(|| {
                NoesisError::MalformedOutput("no structured answer in response".to_string())
            })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "anthropic".to_string(),
            model_name: self.model.clone(),
        }
    }
}
