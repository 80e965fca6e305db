//! Tool trait and metadata definitions
//!
//! A tool is a named, schema-typed callable the oracle may invoke. The engine
//! passes the schema through to the oracle untouched; handlers validate their
//! own arguments since the oracle's choices are not trusted.

use super::result::{ToolError, ToolProvenance, ToolResultEnvelope};
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Instant;

/// Name and description the oracle sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Unique within a toolbox
    pub name: String,
    pub description: String,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// JSON Schema of a tool's arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(parameters: Value) -> Self {
        Self { parameters }
    }

    /// An object with no declared properties
    pub fn empty() -> Self {
        Self {
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }
}

/// Who is calling and from how deep
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    /// Recursion depth of the session issuing the call
    pub depth: usize,
    /// Originating task, when the caller chose to carry it
    pub origin_task: Option<String>,
    /// Participant role, or "assistant" for the top-level chat
    pub caller: Option<String>,
    pub trace_id: Option<String>,
}

impl ToolExecutionContext {
    /// Top-level context at depth 0
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_origin_task(mut self, task: impl Into<String>) -> Self {
        self.origin_task = Some(task.into());
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// A resolved capability the loop can dispatch to
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> &ToolMetadata;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn description(&self) -> &str {
        &self.metadata().description
    }

    fn schema(&self) -> ToolSchema;

    /// The `{name, description, input_schema}` triple shown to the oracle
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.schema().parameters,
        }
    }

    /// Run the tool.
    ///
    /// Handler failures belong in the envelope; `Err` is reserved for
    /// failures outside the handler's own contract.
    async fn execute(
        &self,
        args: Value,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolResultEnvelope, ToolError>;
}

/// The body of a tool without the envelope bookkeeping.
///
/// Wrap one in [`HandlerTool`] to get provenance for free.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value, ToolError>;
}

/// [`ToolHandler`] backed by an async closure
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ToolExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn handle(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value, ToolError> {
        (self.f)(args, ctx.clone()).await
    }
}

/// [`Tool`] around a [`ToolHandler`]
pub struct HandlerTool<H: ToolHandler> {
    metadata: ToolMetadata,
    schema: ToolSchema,
    handler: H,
}

impl<H: ToolHandler> HandlerTool<H> {
    pub fn new(metadata: ToolMetadata, schema: ToolSchema, handler: H) -> Self {
        Self {
            metadata,
            schema,
            handler,
        }
    }
}

impl<F, Fut> HandlerTool<FnHandler<F>>
where
    F: Fn(Value, ToolExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    /// Tool whose handler is an async closure
    pub fn from_fn(metadata: ToolMetadata, schema: ToolSchema, f: F) -> Self {
        Self::new(metadata, schema, FnHandler { f })
    }
}

/// Short SHA-256 of the serialized arguments, for provenance
pub fn args_hash(args: &Value) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(args.to_string().as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Provenance for a call to `tool` that began at `started`
pub fn stamp_provenance(
    tool: &str,
    args: &Value,
    ctx: &ToolExecutionContext,
    started: Instant,
) -> ToolProvenance {
    let provenance = ToolProvenance::new(tool, args_hash(args))
        .with_duration(started.elapsed())
        .with_depth(ctx.depth);
    match &ctx.trace_id {
        Some(trace_id) => provenance.with_trace_id(trace_id.clone()),
        None => provenance,
    }
}

#[async_trait]
impl<H: ToolHandler + 'static> Tool for HandlerTool<H> {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolResultEnvelope, ToolError> {
        let started = Instant::now();
        let outcome = self.handler.handle(args.clone(), ctx).await;
        let provenance = stamp_provenance(&self.metadata.name, &args, ctx, started);

        Ok(match outcome {
            Ok(value) => ToolResultEnvelope::success(value, provenance),
            Err(error) => ToolResultEnvelope::error(error, provenance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> HandlerTool<impl ToolHandler> {
        HandlerTool::from_fn(
            ToolMetadata::new("echo", "Echoes input back"),
            ToolSchema::new(serde_json::json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })),
            |args: Value, _ctx: ToolExecutionContext| async move {
                args.get("message")
                    .cloned()
                    .ok_or_else(|| ToolError::validation("missing 'message'"))
            },
        )
    }

    #[tokio::test]
    async fn test_tool_execution() {
        let tool = echo();
        let ctx = ToolExecutionContext::new().with_depth(1).with_caller("tester");

        let result = tool
            .execute(serde_json::json!({ "message": "hello" }), &ctx)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.value().unwrap(), &serde_json::json!("hello"));
        assert_eq!(result.provenance.depth, 1);
        assert_eq!(result.provenance.args_hash.len(), 16);
    }

    #[tokio::test]
    async fn test_handler_failure_is_enveloped() {
        let tool = echo();
        let result = tool
            .execute(serde_json::json!({}), &ToolExecutionContext::new())
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.get_error().unwrap().message, "missing 'message'");
    }

    #[test]
    fn test_definition() {
        let definition = echo().definition();
        assert_eq!(definition.name, "echo");
        assert_eq!(definition.input_schema["required"][0], "message");
    }
}
