//! Tool-Use Loop Executor
//!
//! Drives one conversation with the oracle until it answers without tool
//! requests or the iteration ceiling is reached:
//!
//! ```text
//! AwaitingOracle ──text only──▶ Done
//!      ▲    │
//!      │    └──tool requests──▶ ExecutingTools
//!      └─────── results ────────────┘
//!
//! (iteration ceiling reached) ──▶ Aborted
//! ```
//!
//! Tool failures, including requests for tools that do not exist, become
//! error-flagged tool messages the oracle can react to. Only a hard oracle
//! failure ends a run early, and even then the caller gets a
//! [`RunOutcome`] rather than an error.

mod hooks;

pub use hooks::{LoggingHooks, NoopHooks, ProgressHooks};

use crate::config::{LlmSettings, RunnerSettings};
use crate::error::NoesisError;
use crate::llm::{
    with_retry_if, LLMConfig, LLMProvider, LLMRequest, Message, RetryConfig, ToolCall,
    ToolDefinition,
};
use crate::tools::{
    ToolError, ToolErrorKind, ToolExecutionContext, ToolProvenance, ToolResult, ToolResultEnvelope,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a run is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingOracle,
    ExecutingTools,
    Done,
    Aborted,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The oracle produced a final answer
    Completed,
    /// The iteration ceiling was reached
    AbortedByLimit,
    /// The oracle failed in a way retries could not fix
    Failed,
}

/// Result or failure of one tool request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Success(Value),
    Failure(ToolError),
}

/// One tool request and what came of it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocationRecord {
    /// Oracle-assigned request id
    pub request_id: String,
    pub tool: String,
    pub arguments: Value,
    pub outcome: InvocationOutcome,
    /// Loop iteration (1-based) that issued the request
    pub turn: u32,
    /// Absent when no tool ran, e.g. for an unknown name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ToolProvenance>,
}

impl ToolInvocationRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, InvocationOutcome::Success(_))
    }

    /// Text fed back to the oracle and whether it reports a failure
    fn tool_message(&self) -> Message {
        let (content, is_error) = match &self.outcome {
            InvocationOutcome::Success(Value::String(s)) => (s.clone(), false),
            InvocationOutcome::Success(value) => (value.to_string(), false),
            InvocationOutcome::Failure(error) => (error.to_payload().to_string(), true),
        };
        Message::tool_result(self.request_id.clone(), content, is_error)
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Final answer, or a description of why there is none
    pub text: String,
    pub invocations: Vec<ToolInvocationRecord>,
    /// Oracle round trips performed
    pub iterations: u32,
    /// The full conversation, for callers that promote parts of it
    #[serde(skip)]
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub final_state: LoopState,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Distinct tool names in first-use order
    pub fn tools_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for record in &self.invocations {
            if !names.contains(&record.tool) {
                names.push(record.tool.clone());
            }
        }
        names
    }
}

/// Loop settings
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Oracle round trips allowed per run
    pub max_iterations: u32,
    /// Dispatch sibling tool requests concurrently
    pub parallel_tools: bool,
    /// Backoff for transient oracle failures
    pub retry: RetryConfig,
    /// Temperature and token limit for every oracle request
    pub llm: LLMConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            parallel_tools: false,
            retry: RetryConfig::default(),
            llm: LLMConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn from_settings(runner: &RunnerSettings, llm: &LlmSettings) -> Self {
        Self {
            max_iterations: runner.max_iterations,
            parallel_tools: runner.parallel_tools,
            retry: runner.retry.clone(),
            llm: llm.generation(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Looks up and invokes tools on behalf of the loop
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Catalog offered to the oracle
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Invoke the tool named by `call`, keeping its provenance
    ///
    /// `Err` means no tool ran; unknown names are reported as
    /// [`ToolErrorKind::UnknownTool`].
    async fn invoke(
        &self,
        call: &ToolCall,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolResultEnvelope, ToolError>;

    /// Invoke the tool named by `call` and collapse the envelope
    async fn dispatch(
        &self,
        call: &ToolCall,
        ctx: &ToolExecutionContext,
    ) -> Result<Value, ToolError> {
        self.invoke(call, ctx).await?.into_result()
    }
}

/// The generic oracle ↔ tools loop
pub struct ToolUseRunner {
    oracle: Arc<dyn LLMProvider>,
    dispatcher: Arc<dyn ToolDispatcher>,
    config: RunnerConfig,
    system_prompt: Option<String>,
    hooks: Arc<dyn ProgressHooks>,
    context: ToolExecutionContext,
}

impl ToolUseRunner {
    pub fn new(oracle: Arc<dyn LLMProvider>, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            oracle,
            dispatcher,
            config: RunnerConfig::default(),
            system_prompt: None,
            hooks: Arc::new(NoopHooks),
            context: ToolExecutionContext::new(),
        }
    }

    /// Prepended to conversations that do not carry a system message
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ProgressHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Context handed to every tool call (depth, caller, trace id)
    pub fn with_context(mut self, context: ToolExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run with the configured iteration ceiling
    pub async fn run(&self, messages: Vec<Message>) -> RunOutcome {
        self.run_with_limit(messages, self.config.max_iterations)
            .await
    }

    /// Run with a ceiling lowered to `limit` for this request only
    pub async fn run_with_limit(&self, mut messages: Vec<Message>, limit: u32) -> RunOutcome {
        let limit = limit.min(self.config.max_iterations);

        if let Some(prompt) = &self.system_prompt {
            if !messages
                .iter()
                .any(|m| m.role == crate::llm::MessageRole::System)
            {
                messages.insert(0, Message::system(prompt.clone()));
            }
        }

        let tools = self.dispatcher.definitions();
        let mut invocations: Vec<ToolInvocationRecord> = Vec::new();
        let mut iterations: u32 = 0;

        debug!(
            depth = self.context.depth,
            tools = tools.len(),
            limit,
            "Starting tool-use loop"
        );

        loop {
            if iterations >= limit {
                warn!(limit, depth = self.context.depth, "Tool-use loop hit iteration limit");
                return RunOutcome {
                    status: RunStatus::AbortedByLimit,
                    text: format!("iteration limit reached ({})", limit),
                    invocations,
                    iterations,
                    messages,
                    error: None,
                    final_state: LoopState::Aborted,
                };
            }
            iterations += 1;

            debug!(iteration = iterations, "Awaiting oracle");
            let request = LLMRequest::new(messages.clone())
                .with_tools(tools.clone())
                .with_config(&self.config.llm);

            let response = match with_retry_if(
                &self.config.retry,
                NoesisError::is_retryable,
                || self.oracle.generate_request(&request),
            )
            .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(iteration = iterations, error = %e, "Oracle failed; ending run");
                    return RunOutcome {
                        status: RunStatus::Failed,
                        text: format!("oracle failure: {}", e),
                        invocations,
                        iterations,
                        messages,
                        error: Some(e.to_string()),
                        final_state: LoopState::Aborted,
                    };
                }
            };

            if !response.content.trim().is_empty() {
                let observer = &self.hooks;
                hooks::fire("on_text", || observer.on_text(&response.content));
            }

            if !response.has_tool_calls() {
                info!(
                    iterations,
                    tool_calls = invocations.len(),
                    depth = self.context.depth,
                    "Tool-use loop completed"
                );
                messages.push(Message::assistant(response.content.clone()));
                return RunOutcome {
                    status: RunStatus::Completed,
                    text: response.content,
                    invocations,
                    iterations,
                    messages,
                    error: None,
                    final_state: LoopState::Done,
                };
            }

            debug!(
                iteration = iterations,
                calls = response.tool_calls.len(),
                "Executing tool calls"
            );
            messages.push(Message::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            let records = self.execute_tools(&response.tool_calls, iterations).await;
            for record in records {
                messages.push(record.tool_message());
                invocations.push(record);
            }
        }
    }

    /// Dispatch one round of tool requests; records come back in request order
    async fn execute_tools(&self, calls: &[ToolCall], turn: u32) -> Vec<ToolInvocationRecord> {
        for call in calls {
            let observer = &self.hooks;
            hooks::fire("on_tool_call", || observer.on_tool_call(call));
        }

        let outcomes: Vec<Result<ToolResultEnvelope, ToolError>> = if self.config.parallel_tools {
            futures::future::join_all(
                calls
                    .iter()
                    .map(|call| self.dispatcher.invoke(call, &self.context)),
            )
            .await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                outcomes.push(self.dispatcher.invoke(call, &self.context).await);
            }
            outcomes
        };

        calls
            .iter()
            .zip(outcomes)
            .map(|(call, outcome)| {
                let (result, provenance) = match outcome {
                    Ok(envelope) => match envelope.result {
                        ToolResult::Success { value } => (Ok(value), Some(envelope.provenance)),
                        ToolResult::Error { error } => (Err(error), Some(envelope.provenance)),
                    },
                    Err(error) => (Err(error), None),
                };
                let outcome = match result {
                    Ok(value) => InvocationOutcome::Success(value),
                    Err(error) => {
                        if error.kind == ToolErrorKind::UnknownTool {
                            warn!(tool = %call.name, "Oracle requested an unknown tool");
                        } else {
                            warn!(tool = %call.name, error = %error, "Tool call failed");
                        }
                        InvocationOutcome::Failure(error)
                    }
                };
                let record = ToolInvocationRecord {
                    request_id: call.id.clone(),
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                    outcome,
                    turn,
                    provenance,
                };
                let observer = &self.hooks;
                hooks::fire("on_tool_result", || observer.on_tool_result(&record));
                record
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MessageRole, ScriptedOracle, ScriptedReply};
    use crate::tools::{FnTool, ToolMetadata, ToolSchema, Toolbox};
    use serde_json::json;
    use std::sync::Mutex;

    fn toolbox() -> Arc<Toolbox> {
        let echo = FnTool::from_fn(
            ToolMetadata::new("echo", "Echo the text argument"),
            ToolSchema::empty(),
            |args: Value, _ctx: ToolExecutionContext| async move { Ok(args["text"].clone()) },
        );
        let fail = FnTool::from_fn(
            ToolMetadata::new("fail", "Always fails"),
            ToolSchema::empty(),
            |_args: Value, _ctx: ToolExecutionContext| async move {
                Err(ToolError::not_found("nothing here"))
            },
        );
        Arc::new(
            Toolbox::new()
                .with(Arc::new(echo))
                .unwrap()
                .with(Arc::new(fail))
                .unwrap(),
        )
    }

    fn runner(oracle: Arc<ScriptedOracle>) -> ToolUseRunner {
        ToolUseRunner::new(oracle, toolbox())
            .with_config(RunnerConfig::default().with_retry(RetryConfig::no_retry()))
    }

    #[tokio::test]
    async fn test_text_only_completes() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedReply::text("hello")]));
        let outcome = runner(oracle.clone()).run(vec![Message::user("hi")]).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.text, "hello");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.final_state, LoopState::Done);
        assert_eq!(oracle.requests()[0].tools.len(), 2);
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedReply::tools(vec![
                ("fail", json!({})),
                ("echo", json!({"text": "second"})),
            ]),
            ScriptedReply::text("done"),
        ]));
        let outcome = runner(oracle.clone()).run(vec![Message::user("go")]).await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.invocations.len(), 2);
        assert!(!outcome.invocations[0].is_success());
        assert_eq!(
            outcome.invocations[1].outcome,
            InvocationOutcome::Success(json!("second"))
        );

        let second_request = &oracle.requests()[1];
        let tool_messages: Vec<&Message> = second_request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 2);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("toolu_0_0"));
        assert!(tool_messages[0].is_error);
        assert!(tool_messages[0].content.contains("nothing here"));
        assert_eq!(tool_messages[1].content, "second");
    }

    #[tokio::test]
    async fn test_records_carry_provenance() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedReply::tools(vec![("echo", json!({"text": "hi"})), ("teleport", json!({}))]),
            ScriptedReply::text("done"),
        ]));
        let outcome = runner(oracle)
            .with_context(ToolExecutionContext::new().with_depth(1).with_trace_id("trace-7"))
            .run(vec![Message::user("go")])
            .await;

        let provenance = outcome.invocations[0].provenance.as_ref().unwrap();
        assert_eq!(provenance.tool_name, "echo");
        assert_eq!(provenance.depth, 1);
        assert_eq!(provenance.trace_id.as_deref(), Some("trace-7"));
        assert!(outcome.invocations[1].provenance.is_none());
    }

    #[tokio::test]
    async fn test_parallel_dispatch_keeps_order() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedReply::tools(vec![
                ("echo", json!({"text": "a"})),
                ("echo", json!({"text": "b"})),
                ("echo", json!({"text": "c"})),
            ]),
            ScriptedReply::text("done"),
        ]));
        let outcome = ToolUseRunner::new(oracle, toolbox())
            .with_config(RunnerConfig::default().with_parallel_tools(true))
            .run(vec![Message::user("go")])
            .await;

        let values: Vec<_> = outcome
            .invocations
            .iter()
            .map(|r| r.outcome.clone())
            .collect();
        assert_eq!(
            values,
            vec![
                InvocationOutcome::Success(json!("a")),
                InvocationOutcome::Success(json!("b")),
                InvocationOutcome::Success(json!("c")),
            ]
        );
    }

    #[tokio::test]
    async fn test_per_request_limit_only_lowers() {
        let oracle = Arc::new(ScriptedOracle::repeating(ScriptedReply::tool(
            "echo",
            json!({"text": "again"}),
        )));
        let runner = runner(oracle.clone())
            .with_config(RunnerConfig::default().with_max_iterations(3));

        let outcome = runner.run_with_limit(vec![Message::user("go")], 50).await;

        assert_eq!(outcome.status, RunStatus::AbortedByLimit);
        assert_eq!(outcome.text, "iteration limit reached (3)");
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test]
    async fn test_hard_oracle_error_fails_run() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedReply::tool("echo", json!({"text": "x"})),
            ScriptedReply::Hard("invalid api key".into()),
        ]));
        let outcome = runner(oracle).run(vec![Message::user("go")]).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("invalid api key"));
        assert_eq!(outcome.invocations.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedReply::Transient("529 overloaded".into()),
            ScriptedReply::text("recovered"),
        ]));
        let outcome = ToolUseRunner::new(oracle.clone(), toolbox())
            .run(vec![Message::user("go")])
            .await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.text, "recovered");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(oracle.call_count(), 2);
    }

    #[tokio::test]
    async fn test_system_prompt_prepended_once() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedReply::text("ok")]));
        runner(oracle.clone())
            .with_system_prompt("be useful")
            .run(vec![Message::user("go")])
            .await;

        let request = &oracle.requests()[0];
        assert_eq!(request.system_prompt(), Some("be useful"));
        assert_eq!(request.messages.len(), 2);
    }

    struct PanickingHooks {
        seen: Mutex<Vec<String>>,
    }

    impl ProgressHooks for PanickingHooks {
        fn on_tool_call(&self, call: &ToolCall) {
            self.seen.lock().unwrap().push(call.name.clone());
            panic!("observer bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_hook_does_not_stop_run() {
        let hooks = Arc::new(PanickingHooks {
            seen: Mutex::new(Vec::new()),
        });
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedReply::tool("echo", json!({"text": "x"})),
            ScriptedReply::text("done"),
        ]));

        let outcome = runner(oracle)
            .with_hooks(hooks.clone())
            .run(vec![Message::user("go")])
            .await;

        assert!(outcome.is_completed());
        assert_eq!(*hooks.seen.lock().unwrap(), vec!["echo".to_string()]);
    }
}
