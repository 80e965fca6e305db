//! Role-scoped participants
//!
//! A team member is a catalog participant seen through a role: the role's
//! instructions replace the participant's own, and the member carries the
//! recursion depth it runs at. Below the team's depth ceiling a member works
//! in research mode with tools; at the ceiling it answers in one call.

use super::environment::TeamEnvironment;
use super::participant::{ask_once, parse_answer, Participant};
use super::session::RecursiveSession;
use crate::error::{NoesisError, Result};
use crate::llm::{LLMConfig, LLMProvider};
use crate::runner::RunStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Position of a participant in the recursion tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursionContext {
    pub depth: usize,
    pub max_depth: usize,
    /// Task that started the chain; carried for tools, never put in prompts
    pub origin_task: Option<String>,
}

impl RecursionContext {
    /// Context at `depth`, capped at `max_depth`
    ///
    /// A team with a lower ceiling than the depth it is entered at runs its
    /// members at its own ceiling.
    pub fn new(depth: usize, max_depth: usize) -> Self {
        Self {
            depth: depth.min(max_depth),
            max_depth,
            origin_task: None,
        }
    }

    pub fn with_origin_task(mut self, task: impl Into<String>) -> Self {
        self.origin_task = Some(task.into());
        self
    }

    /// Context one level deeper, never past the ceiling
    pub fn descend(&self) -> Self {
        Self {
            depth: (self.depth + 1).min(self.max_depth),
            ..self.clone()
        }
    }

    /// Whether a participant at this depth may use tools
    pub fn can_research(&self) -> bool {
        self.depth < self.max_depth
    }

    /// Whether a session at this depth may open a nested one
    pub fn can_descend(&self) -> bool {
        self.depth + 1 < self.max_depth
    }
}

/// A participant playing a role in one team
pub struct RoleScoped {
    inner: Arc<dyn Participant>,
    role: String,
    instructions: String,
    description: String,
    context: RecursionContext,
    env: Arc<TeamEnvironment>,
}

impl RoleScoped {
    pub fn new(
        inner: Arc<dyn Participant>,
        role: impl Into<String>,
        context: RecursionContext,
        env: Arc<TeamEnvironment>,
    ) -> Self {
        Self {
            inner,
            role: role.into(),
            instructions: String::new(),
            description: String::new(),
            context,
            env,
        }
    }

    /// Role instructions; empty keeps the participant's own
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn context(&self) -> &RecursionContext {
        &self.context
    }
}

#[async_trait]
impl Participant for RoleScoped {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        if self.description.is_empty() {
            self.inner.description()
        } else {
            &self.description
        }
    }

    fn instructions(&self) -> &str {
        if self.instructions.is_empty() {
            self.inner.instructions()
        } else {
            &self.instructions
        }
    }

    fn oracle(&self) -> Arc<dyn LLMProvider> {
        self.inner.oracle()
    }

    fn llm_config(&self) -> LLMConfig {
        self.inner.llm_config()
    }

    async fn process(&self, instruction: &str, inputs: &Map<String, Value>) -> Result<Value> {
        if !self.context.can_research() {
            debug!(
                role = %self.role,
                depth = self.context.depth,
                "Depth ceiling reached; answering without tools"
            );
            return ask_once(self, instruction, inputs).await;
        }

        let report = RecursiveSession::new(
            Arc::clone(&self.env),
            self.oracle(),
            self.context.clone(),
        )
        .with_role(&self.role, self.instructions())
        .with_llm(self.llm_config())
        .run(instruction, inputs)
        .await?;

        match report.status {
            RunStatus::Completed => Ok(parse_answer(&report.result)),
            _ => Err(NoesisError::Other(format!(
                "research by '{}' at depth {} did not complete: {}",
                self.role, report.depth, report.result
            ))),
        }
    }
}

impl std::fmt::Debug for RoleScoped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleScoped")
            .field("role", &self.role)
            .field("participant", &self.inner.name())
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursion_context() {
        let root = RecursionContext::new(0, 2).with_origin_task("survey");
        assert!(root.can_research());
        assert!(root.can_descend());

        let child = root.descend();
        assert_eq!(child.depth, 1);
        assert_eq!(child.origin_task.as_deref(), Some("survey"));
        assert!(child.can_research());
        assert!(!child.can_descend());

        let leaf = child.descend();
        assert!(!leaf.can_research());
        assert_eq!(leaf.descend().depth, 2);
        assert_eq!(root.depth, 0);
    }

    #[test]
    fn test_depth_capped_at_ceiling() {
        let context = RecursionContext::new(3, 1);
        assert_eq!(context.depth, 1);
        assert!(!context.can_research());
    }
}
