//! Recursive research sessions
//!
//! A team member below the depth ceiling handles its step by running a
//! fresh tool-use loop. The loop sees the external toolbox, the team tools
//! (whose members start one level deeper) and, while depth allows, a
//! `research` tool that opens a nested session. Only the final text and a
//! one-line meta summary survive; the conversation is dropped.

use super::blackboard::truncate_chars;
use super::environment::TeamEnvironment;
use super::participant::render_task;
use super::role::RecursionContext;
use super::tools::{team_toolbox, RUN_AD_HOC_TEAM, RUN_TEAM};
use crate::error::Result;
use crate::llm::{LLMConfig, LLMProvider, Message, ToolCall, ToolDefinition};
use crate::prompts::RESEARCH_PREAMBLE;
use crate::runner::{RunOutcome, RunStatus, ToolDispatcher, ToolUseRunner};
use crate::tools::{
    stamp_provenance, ToolError, ToolExecutionContext, ToolResultEnvelope, Toolbox,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};

/// Name of the nested research tool
pub const RESEARCH_TOOL: &str = "research";

/// What a finished session leaves behind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    /// Final oracle text, or why there is none
    pub result: String,
    pub meta_summary: String,
    pub status: RunStatus,
    pub depth: usize,
}

/// One research-mode tool-use loop at a fixed depth
pub struct RecursiveSession {
    env: Arc<TeamEnvironment>,
    oracle: Arc<dyn LLMProvider>,
    context: RecursionContext,
    role: String,
    instructions: String,
    llm: Option<LLMConfig>,
}

impl RecursiveSession {
    pub fn new(
        env: Arc<TeamEnvironment>,
        oracle: Arc<dyn LLMProvider>,
        context: RecursionContext,
    ) -> Self {
        Self {
            env,
            oracle,
            context,
            role: "researcher".to_string(),
            instructions: String::new(),
            llm: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>, instructions: impl Into<String>) -> Self {
        self.role = role.into();
        self.instructions = instructions.into();
        self
    }

    pub fn with_llm(mut self, config: LLMConfig) -> Self {
        self.llm = Some(config);
        self
    }

    /// Run the session for `query` with optional input data
    pub async fn run(&self, query: &str, inputs: &Map<String, Value>) -> Result<SessionReport> {
        let depth = self.context.depth;
        let span = info_span!("research", depth, role = %self.role);

        async move {
            let system = RESEARCH_PREAMBLE.render(&crate::prompt_vars! {
                "role" => self.role,
                "instructions" => self.instructions,
                "depth" => depth,
                "max_depth" => self.context.max_depth,
            })?;

            let dispatcher = Arc::new(SessionDispatcher::new(
                Arc::clone(&self.env),
                self.context.clone(),
                self.role.clone(),
                self.instructions.clone(),
                Arc::clone(&self.oracle),
                self.llm.clone(),
            )?);

            let mut config = self
                .env
                .runner_config()
                .clone()
                .with_max_iterations(self.env.settings().research_max_iterations);
            if let Some(llm) = &self.llm {
                config.llm = llm.clone();
            }

            let mut tool_context = ToolExecutionContext::new()
                .with_depth(depth)
                .with_caller(self.role.clone());
            if let Some(task) = &self.context.origin_task {
                tool_context = tool_context.with_origin_task(task.clone());
            }

            let runner = ToolUseRunner::new(Arc::clone(&self.oracle), dispatcher)
                .with_system_prompt(system)
                .with_config(config)
                .with_hooks(self.env.hooks())
                .with_context(tool_context);

            let outcome = runner
                .run(vec![Message::user(render_task(query, inputs))])
                .await;

            let meta_summary = meta_summary(query, depth, &outcome);
            info!(status = ?outcome.status, "{}", meta_summary);
            self.env.record_meta(meta_summary.clone());

            Ok(SessionReport {
                result: outcome.text,
                meta_summary,
                status: outcome.status,
                depth,
            })
        }
        .instrument(span)
        .await
    }
}

/// One-line account of a session, built without the oracle
pub fn meta_summary(query: &str, depth: usize, outcome: &RunOutcome) -> String {
    let tools: Vec<&str> = outcome
        .invocations
        .iter()
        .map(|r| r.tool.as_str())
        .collect();
    let sub_teams = tools
        .iter()
        .filter(|t| **t == RUN_TEAM || **t == RUN_AD_HOC_TEAM)
        .count();
    let nested = tools.iter().filter(|t| **t == RESEARCH_TOOL).count();
    let tool_list = if tools.is_empty() {
        "none".to_string()
    } else {
        tools.join(", ")
    };

    format!(
        "[research depth={}] query: {} | tools: {} | sub-teams: {} | nested research: {} | result: {} chars",
        depth,
        query.chars().take(60).collect::<String>(),
        tool_list,
        sub_teams,
        nested,
        outcome.text.chars().count()
    )
}

fn research_definition() -> ToolDefinition {
    ToolDefinition {
        name: RESEARCH_TOOL.to_string(),
        description: "Open a nested research session with the full tool set to look up \
                      information that supports your work. Returns the session's findings."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to find out"},
                "context": {"type": "string", "description": "Background that makes the research more precise"}
            },
            "required": ["query"]
        }),
    }
}

/// Tools visible inside a session
struct SessionDispatcher {
    env: Arc<TeamEnvironment>,
    team_tools: Toolbox,
    context: RecursionContext,
    role: String,
    instructions: String,
    oracle: Arc<dyn LLMProvider>,
    llm: Option<LLMConfig>,
}

impl SessionDispatcher {
    fn new(
        env: Arc<TeamEnvironment>,
        context: RecursionContext,
        role: String,
        instructions: String,
        oracle: Arc<dyn LLMProvider>,
        llm: Option<LLMConfig>,
    ) -> Result<Self> {
        let team_tools = team_toolbox(&env)?;
        Ok(Self {
            env,
            team_tools,
            context,
            role,
            instructions,
            oracle,
            llm,
        })
    }

    async fn research(&self, call: &ToolCall) -> std::result::Result<Value, ToolError> {
        let query = call.arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::validation("research needs a non-empty 'query'"))?;
        let query = match call.arguments["context"].as_str() {
            Some(context) if !context.trim().is_empty() => format!(
                "Research query: {}\n\nCurrent context:\n{}",
                query,
                truncate_chars(context, 2_000)
            ),
            _ => query.to_string(),
        };

        let mut nested = RecursiveSession::new(
            Arc::clone(&self.env),
            Arc::clone(&self.oracle),
            self.context.descend(),
        )
        .with_role(self.role.clone(), self.instructions.clone());
        if let Some(llm) = &self.llm {
            nested = nested.with_llm(llm.clone());
        }

        let report = nested
            .run(&query, &Map::new())
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        match report.status {
            RunStatus::Completed => Ok(Value::String(report.result)),
            _ => Err(ToolError::internal(format!(
                "nested research did not complete: {}",
                report.result
            ))),
        }
    }
}

#[async_trait]
impl ToolDispatcher for SessionDispatcher {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = self.env.toolbox().definitions();
        definitions.extend(self.team_tools.definitions());
        if self.context.can_descend() {
            definitions.push(research_definition());
        }
        definitions
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        ctx: &ToolExecutionContext,
    ) -> std::result::Result<ToolResultEnvelope, ToolError> {
        if call.name == RESEARCH_TOOL && self.context.can_descend() {
            let started = Instant::now();
            let outcome = self.research(call).await;
            let provenance = stamp_provenance(RESEARCH_TOOL, &call.arguments, ctx, started);
            return Ok(match outcome {
                Ok(value) => ToolResultEnvelope::success(value, provenance),
                Err(error) => ToolResultEnvelope::error(error, provenance),
            });
        }
        if self.team_tools.contains(&call.name) {
            let deeper = ctx.clone().with_depth(self.context.depth + 1);
            return self.team_tools.invoke(call, &deeper).await;
        }
        self.env.toolbox().invoke(call, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{InvocationOutcome, LoopState, ToolInvocationRecord};

    fn outcome(tools: &[&str], text: &str) -> RunOutcome {
        RunOutcome {
            status: RunStatus::Completed,
            text: text.to_string(),
            invocations: tools
                .iter()
                .enumerate()
                .map(|(i, t)| ToolInvocationRecord {
                    request_id: format!("r{i}"),
                    tool: t.to_string(),
                    arguments: json!({}),
                    outcome: InvocationOutcome::Success(json!(null)),
                    turn: 1,
                    provenance: None,
                })
                .collect(),
            iterations: 2,
            messages: Vec::new(),
            error: None,
            final_state: LoopState::Done,
        }
    }

    #[test]
    fn test_meta_summary_format() {
        let query = "q".repeat(100);
        let summary = meta_summary(
            &query,
            1,
            &outcome(&["search_papers", "run_team", "research", "run_ad_hoc_team"], "abcde"),
        );
        assert_eq!(
            summary,
            format!(
                "[research depth=1] query: {} | tools: search_papers, run_team, research, run_ad_hoc_team | sub-teams: 2 | nested research: 1 | result: 5 chars",
                "q".repeat(60)
            )
        );
    }

    #[test]
    fn test_meta_summary_without_tools() {
        let summary = meta_summary("what", 0, &outcome(&[], ""));
        assert_eq!(
            summary,
            "[research depth=0] query: what | tools: none | sub-teams: 0 | nested research: 0 | result: 0 chars"
        );
    }
}
