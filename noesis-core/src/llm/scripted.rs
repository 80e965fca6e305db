//! Scripted oracle for deterministic runs
//!
//! Replays a fixed list of replies in order and records every request it
//! receives, so loops, teams and recursive sessions can be driven offline.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{NoesisError, Result};
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, ModelInfo, ToolCall};
use crate::parsing::JsonParser;

/// One predetermined oracle reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Final text, no tool requests
    Text(String),
    /// Tool requests with optional accompanying text
    Tools { text: String, calls: Vec<ToolCall> },
    /// Answer to a structured request
    Structured(Value),
    /// Retryable failure
    Transient(String),
    /// Non-retryable failure
    Hard(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    /// Request a single tool; the request id is assigned when served
    pub fn tool(name: impl Into<String>, arguments: Value) -> Self {
        ScriptedReply::Tools {
            text: String::new(),
            calls: vec![ToolCall::new("", name, arguments)],
        }
    }

    /// Request several tools in one turn
    pub fn tools(calls: Vec<(&str, Value)>) -> Self {
        ScriptedReply::Tools {
            text: String::new(),
            calls: calls
                .into_iter()
                .map(|(name, args)| ToolCall::new("", name, args))
                .collect(),
        }
    }

    pub fn structured(value: Value) -> Self {
        ScriptedReply::Structured(value)
    }
}

/// Oracle that answers from a script.
///
/// When the script runs out, the last reply is repeated if the oracle was
/// built with [`ScriptedOracle::repeating`]; otherwise a hard error is
/// returned.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    repeat_last: bool,
    requests: Mutex<Vec<LLMRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedOracle {
    /// Create an oracle replaying `replies` once, in order
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create an oracle that answers `reply` forever
    pub fn repeating(reply: ScriptedReply) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![reply])
        }
    }

    /// Number of requests served so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replies not yet served
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_reply(&self, request: &LLMRequest) -> Result<(usize, ScriptedReply)> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let reply = match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None if self.repeat_last => last.clone().ok_or_else(|| {
                NoesisError::OracleHard("scripted oracle has no replies".to_string())
            })?,
            None => {
                return Err(NoesisError::OracleHard(format!(
                    "scripted oracle exhausted after {} replies",
                    index
                )));
            }
        };
        Ok((index, reply))
    }
}

#[async_trait]
impl LLMProvider for ScriptedOracle {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let (index, reply) = self.next_reply(request)?;
        match reply {
            ScriptedReply::Text(text) => Ok(LLMResponse::text(text)),
            ScriptedReply::Tools { text, calls } => {
                let calls = calls
                    .into_iter()
                    .enumerate()
                    .map(|(n, call)| {
                        let id = if call.id.is_empty() {
                            format!("toolu_{index}_{n}")
                        } else {
                            call.id
                        };
                        ToolCall { id, ..call }
                    })
                    .collect();
                Ok(LLMResponse::with_tool_calls(text, calls))
            }
            ScriptedReply::Structured(value) => Ok(LLMResponse::text(value.to_string())),
            ScriptedReply::Transient(message) => Err(NoesisError::OracleTransient(message)),
            ScriptedReply::Hard(message) => Err(NoesisError::OracleHard(message)),
        }
    }

    async fn generate_structured(&self, request: &LLMRequest, _schema: &Value) -> Result<Value> {
        let (_, reply) = self.next_reply(request)?;
        match reply {
            ScriptedReply::Structured(value) => Ok(value),
            ScriptedReply::Text(text) => JsonParser::strict()
                .parse(&text)
                .map_err(|e| NoesisError::MalformedOutput(e.to_string())),
            ScriptedReply::Tools { .. } => Err(NoesisError::MalformedOutput(
                "expected a structured answer, got tool requests".to_string(),
            )),
            ScriptedReply::Transient(message) => Err(NoesisError::OracleTransient(message)),
            ScriptedReply::Hard(message) => Err(NoesisError::OracleHard(message)),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: "script".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replies_in_order_then_exhausts() {
        let oracle = ScriptedOracle::new(vec![
            ScriptedReply::tool("list", json!({})),
            ScriptedReply::text("done"),
        ]);
        let request = LLMRequest::from_prompt("go");

        let first = oracle.generate_request(&request).await.unwrap();
        assert_eq!(first.tool_calls[0].id, "toolu_0_0");
        assert_eq!(first.tool_calls[0].name, "list");

        let second = oracle.generate_request(&request).await.unwrap();
        assert_eq!(second.content, "done");
        assert!(!second.has_tool_calls());

        let third = oracle.generate_request(&request).await;
        assert!(matches!(third, Err(NoesisError::OracleHard(_))));
        assert_eq!(oracle.call_count(), 3);
        assert_eq!(oracle.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_repeating_oracle() {
        let oracle = ScriptedOracle::repeating(ScriptedReply::text("again"));
        for _ in 0..4 {
            let response = oracle
                .generate_request(&LLMRequest::from_prompt("x"))
                .await
                .unwrap();
            assert_eq!(response.content, "again");
        }
        assert_eq!(oracle.call_count(), 4);
    }

    #[tokio::test]
    async fn test_structured_reply() {
        let oracle = ScriptedOracle::new(vec![ScriptedReply::structured(json!({"a": 1}))]);
        let value = oracle
            .generate_structured(&LLMRequest::from_prompt("x"), &json!({}))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_failure_classification() {
        let oracle = ScriptedOracle::new(vec![
            ScriptedReply::Transient("overloaded".into()),
            ScriptedReply::Hard("bad key".into()),
        ]);
        let request = LLMRequest::from_prompt("x");

        let err = oracle.generate_request(&request).await.unwrap_err();
        assert!(err.is_retryable());
        let err = oracle.generate_request(&request).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
