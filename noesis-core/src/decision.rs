//! Structured Decision Caller
//!
//! Asks the oracle for exactly one value conforming to a JSON Schema. The
//! answer is checked before it is returned; malformed or non-conforming
//! answers and transient oracle failures are retried with backoff, and the
//! caller gets [`NoesisError::DecisionFormat`] once the budget is spent.

use crate::error::{NoesisError, Result};
use crate::llm::{with_retry_if, LLMProvider, LLMRequest, RetryConfig};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Issues schema-constrained oracle requests
#[derive(Clone)]
pub struct DecisionCaller {
    oracle: Arc<dyn LLMProvider>,
    retry: RetryConfig,
}

impl DecisionCaller {
    pub fn new(oracle: Arc<dyn LLMProvider>) -> Self {
        Self {
            oracle,
            retry: RetryConfig::default(),
        }
    }

    /// Backoff between attempts; the attempt count comes from each call
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// One conforming value, after at most `max_retries` extra attempts
    pub async fn decide(
        &self,
        request: &LLMRequest,
        schema: &Value,
        max_retries: u32,
    ) -> Result<Value> {
        self.decide_with(request, schema, max_retries, Ok).await
    }

    /// Like [`decide`](Self::decide), also deserializing into `T`
    pub async fn decide_as<T: DeserializeOwned>(
        &self,
        request: &LLMRequest,
        schema: &Value,
        max_retries: u32,
    ) -> Result<T> {
        self.decide_with(request, schema, max_retries, |value| {
            serde_json::from_value(value).map_err(|e| e.to_string())
        })
        .await
    }

    async fn decide_with<T, P>(
        &self,
        request: &LLMRequest,
        schema: &Value,
        max_retries: u32,
        parse: P,
    ) -> Result<T>
    where
        P: Fn(Value) -> std::result::Result<T, String>,
    {
        let retry = self
            .retry
            .clone()
            .with_max_attempts(max_retries as usize + 1);
        let attempts = AtomicU32::new(0);
        let oracle = &self.oracle;
        let parse = &parse;

        let outcome = with_retry_if(
            &retry,
            |e: &NoesisError| {
                matches!(
                    e,
                    NoesisError::OracleTransient(_) | NoesisError::MalformedOutput(_)
                )
            },
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let value = oracle.generate_structured(request, schema).await?;
                    if let Err(violations) = check_conformance(schema, &value) {
                        warn!(attempt, violations = ?violations, "Decision does not match schema");
                        return Err(NoesisError::MalformedOutput(format!(
                            "answer does not match schema: {}",
                            violations.join("; ")
                        )));
                    }
                    parse(value).map_err(NoesisError::MalformedOutput)
                }
            },
        )
        .await;

        outcome.map_err(|e| match e {
            NoesisError::MalformedOutput(reason) => NoesisError::DecisionFormat {
                attempts: attempts.load(Ordering::SeqCst),
                reason,
            },
            other => other,
        })
    }
}

/// Check `value` against the subset of JSON Schema used for decisions:
/// `type`, `enum`, `required`, `properties` and `items`.
///
/// Returns every violation found, each prefixed with its JSON path.
pub fn check_conformance(schema: &Value, value: &Value) -> std::result::Result<(), Vec<String>> {
    let mut violations = Vec::new();
    check_node(schema, value, "$", &mut violations);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn check_node(schema: &Value, value: &Value, path: &str, violations: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(types) => types.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            violations.push(format!(
                "{}: expected {}, got {}",
                path,
                allowed.join(" or "),
                type_name(value)
            ));
            return;
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            violations.push(format!("{}: {} is not one of {}", path, value, Value::Array(options.clone())));
        }
    }

    if let Value::Object(fields) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(key) {
                    violations.push(format!("{}: missing required property '{}'", path, key));
                }
            }
        }
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (key, field) in fields {
                if let Some(field_schema) = properties.get(key) {
                    check_node(field_schema, field, &format!("{}.{}", path, key), violations);
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check_node(item_schema, item, &format!("{}[{}]", path, i), violations);
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
