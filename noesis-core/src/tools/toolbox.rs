//! Resolved tool set handed to a tool-use loop
//!
//! A [`Toolbox`] is the output of capability resolution: name-keyed handlers
//! with their oracle-facing definitions. It is also the default
//! [`ToolDispatcher`] for a [`ToolUseRunner`](crate::runner::ToolUseRunner).

use super::result::{ToolError, ToolResultEnvelope};
use super::tool::{Tool, ToolExecutionContext};
use crate::error::{NoesisError, Result};
use crate::llm::{ToolCall, ToolDefinition};
use crate::runner::ToolDispatcher;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name-keyed set of resolved tools
#[derive(Clone, Default)]
pub struct Toolbox {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Toolbox {
    /// Create an empty toolbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    ///
    /// Returns an error if a tool with the same name already exists.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(NoesisError::DuplicateCapability { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Oracle-facing definitions for every tool
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Add every tool of `other`; names already present are an error
    pub fn merge(&mut self, other: &Toolbox) -> Result<()> {
        for tool in other.tools.values() {
            self.register(Arc::clone(tool))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox")
            .field("tools", &self.names())
            .finish()
    }
}

#[async_trait]
impl ToolDispatcher for Toolbox {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Toolbox::definitions(self)
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        ctx: &ToolExecutionContext,
    ) -> std::result::Result<ToolResultEnvelope, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::unknown_tool(&call.name))?;

        tool.execute(call.arguments.clone(), ctx).await
    }
}
