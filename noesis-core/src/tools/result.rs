//! Structured tool result envelope and error model
//!
//! Every handler outcome, successful or not, is wrapped in a
//! [`ToolResultEnvelope`] with provenance so the loop can feed failures back
//! to the oracle instead of aborting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// What a tool hands back: the outcome plus where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultEnvelope {
    pub result: ToolResult,
    pub provenance: ToolProvenance,
}

impl ToolResultEnvelope {
    pub fn success(value: Value, provenance: ToolProvenance) -> Self {
        Self {
            result: ToolResult::Success { value },
            provenance,
        }
    }

    pub fn error(error: ToolError, provenance: ToolProvenance) -> Self {
        Self {
            result: ToolResult::Error { error },
            provenance,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, ToolResult::Success { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.result {
            ToolResult::Success { value } => Some(value),
            ToolResult::Error { .. } => None,
        }
    }

    pub fn get_error(&self) -> Option<&ToolError> {
        match &self.result {
            ToolResult::Error { error } => Some(error),
            ToolResult::Success { .. } => None,
        }
    }

    /// Collapse into the handler contract: a value or a failure
    pub fn into_result(self) -> Result<Value, ToolError> {
        match self.result {
            ToolResult::Success { value } => Ok(value),
            ToolResult::Error { error } => Err(error),
        }
    }
}

/// Serialized as `{"status": "success", "value": ..}` or
/// `{"status": "error", "error": {..}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { value: Value },
    Error { error: ToolError },
}

/// Structured tool failure: `{kind, message}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    /// Extra detail passed through to the oracle untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Arguments did not satisfy the tool's expectations
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Validation, message)
    }

    /// The oracle asked for a tool that does not exist
    pub fn unknown_tool(name: &str) -> Self {
        Self::new(
            ToolErrorKind::UnknownTool,
            format!("unknown capability: {}", name),
        )
    }

    /// Requested resource does not exist
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    /// The handler itself broke
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, message)
    }

    /// Payload fed back to the oracle
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::json!({
            "error": self.message,
            "kind": self.kind,
        });
        if let Some(context) = &self.context {
            payload["context"] = context.clone();
        }
        payload
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<crate::error::NoesisError> for ToolError {
    fn from(err: crate::error::NoesisError) -> Self {
        use crate::error::NoesisError;
        let kind = match &err {
            NoesisError::UnknownTool(_) => ToolErrorKind::UnknownTool,
            NoesisError::UnknownTeam(_)
            | NoesisError::UnknownParticipant(_)
            | NoesisError::KeyNotFound(_) => ToolErrorKind::NotFound,
            NoesisError::InvalidDelegation(_) | NoesisError::Configuration(_) => {
                ToolErrorKind::Validation
            }
            NoesisError::OracleTransient(_) => ToolErrorKind::Transient,
            _ => ToolErrorKind::Internal,
        };
        ToolError::new(kind, err.to_string())
    }
}

/// Failure categories the oracle can react to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Bad arguments; the oracle should fix the call
    Validation,
    UnknownTool,
    Timeout,
    /// Backend hiccup; the same call may work later
    Transient,
    NotFound,
    Internal,
}

impl ToolErrorKind {
    /// Worth repeating the identical call
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolErrorKind::Timeout | ToolErrorKind::Transient)
    }
}

/// Where a result came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProvenance {
    pub tool_name: String,
    /// Truncated SHA-256 of the serialized arguments
    pub args_hash: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Recursion depth of the caller
    pub depth: usize,
    /// Chat session id, when the call came from one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ToolProvenance {
    /// Provenance stamped with the current time
    pub fn new(tool_name: impl Into<String>, args_hash: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            args_hash: args_hash.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            depth: 0,
            trace_id: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}
