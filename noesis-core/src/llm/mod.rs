//! Oracle abstraction
//!
//! Everything the engine knows about the LLM goes through [`LLMProvider`]:
//! a conversation plus an optional tool catalog goes in, and text, tool-call
//! requests, or a structured value come out. Failures are classified as
//! transient ([`NoesisError::OracleTransient`]) or hard
//! ([`NoesisError::OracleHard`]) so callers know what is worth retrying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NoesisError, Result};
use crate::parsing::JsonParser;

/// Sampling settings shared by every call a caller makes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// 0.0 to 2.0
    pub temperature: f32,
    pub max_tokens: usize,
    pub system_prompt: Option<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            system_prompt: None,
        }
    }
}

impl LLMConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    /// Result of a tool call, answering an earlier assistant request
    Tool,
}

/// A tool invocation requested by the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Request id assigned by the oracle; results are tagged with it
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,

    /// Tool requests carried by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Request id a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Whether a tool message reports a failure
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    /// Assistant turn that requests tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(MessageRole::Assistant, content)
        }
    }

    /// Tool result answering request `tool_call_id`
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            is_error,
            ..Self::plain(MessageRole::Tool, content)
        }
    }
}

/// A tool as advertised to the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One oracle round trip
#[derive(Debug, Clone)]
pub struct LLMRequest {
    pub messages: Vec<Message>,
    /// Provider default when unset
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop_sequences: Vec<String>,

    /// Tools the oracle may request; empty means a plain completion
    pub tools: Vec<ToolDefinition>,
}

impl LLMRequest {
    /// Create a request from a full conversation
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            stop_sequences: Vec::new(),
            tools: Vec::new(),
        }
    }

    /// A lone user message
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    /// `[system, user]`
    pub fn with_system_prompt(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self::new(vec![Message::system(system_prompt), Message::user(user_prompt)])
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Apply temperature and token limit from an [`LLMConfig`]
    pub fn with_config(self, config: &LLMConfig) -> Self {
        self.with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
    }

    /// System prompt, if the conversation carries one
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
    }
}

/// What the oracle said back
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    /// Generated text (may be empty when only tools were requested)
    pub content: String,

    /// Tool requests, in the order the oracle emitted them
    pub tool_calls: Vec<ToolCall>,

    pub stop_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl LLMResponse {
    /// Text-only response
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Response requesting tools, with optional accompanying text
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            stop_reason: Some("tool_use".to_string()),
            usage: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// The oracle contract.
///
/// Implementors only need [`generate_request`](LLMProvider::generate_request);
/// [`generate_structured`](LLMProvider::generate_structured) falls back to
/// parsing JSON out of a text answer, and providers with a native forced-choice
/// mechanism should override it.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate text for a single prompt.
    async fn generate(&self, prompt: &str, config: &LLMConfig) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = &config.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        let request = LLMRequest::new(messages).with_config(config);
        let response = self.generate_request(&request).await?;
        Ok(response.content)
    }

    /// Send a conversation (and the tools in `request.tools`) to the oracle.
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse>;

    /// Ask for one value conforming to `schema`.
    ///
    /// The returned value is *not* checked against the schema here; that is
    /// the decision caller's job.
    async fn generate_structured(&self, request: &LLMRequest, schema: &Value) -> Result<Value> {
        let mut request = request.clone();
        request.tools.clear();
        request.messages.push(Message::user(format!(
            "Respond with a single JSON object matching this schema and nothing else:\n{}",
            serde_json::to_string_pretty(schema)?
        )));

        let response = self.generate_request(&request).await?;
        JsonParser::strict()
            .parse(&response.content)
            .map_err(|e| NoesisError::MalformedOutput(e.to_string()))
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

pub mod factory;
pub mod providers;
pub mod retry;
pub mod scripted;

pub use retry::{with_retry, with_retry_if, RetryConfig};
pub use scripted::{ScriptedOracle, ScriptedReply};

pub use factory::LLMProviderFactory;
