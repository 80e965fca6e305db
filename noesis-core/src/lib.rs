//! # Noesis - multi-agent tool-use orchestration
//!
//! Noesis lets a user converse with an LLM (the *oracle*) that decides on its
//! own which backend capabilities to call. The crate provides:
//! - a capability registry with dependency resolution and config bindings
//! - the generic oracle ↔ tools loop with iteration ceilings and progress hooks
//! - schema-constrained decisions with bounded retries
//! - teams: a coordinator delegating steps to role-scoped participants over a
//!   shared blackboard
//! - recursive research sessions, bounded by a per-team depth ceiling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use noesis_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let assistant = AssistantBuilder::new(NoesisConfig::load()?).build()?;
//!     let mut session = assistant.session();
//!
//!     let outcome = session.send("Summarize the papers I saved last week").await;
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `llm-anthropic`: Anthropic Messages API provider

pub mod chat;
pub mod config;
pub mod decision;
pub mod error;
pub mod llm;
pub mod parsing;
pub mod prompts;
pub mod registry;
pub mod runner;
pub mod team;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::chat::{Assistant, AssistantBuilder, ChatSession};
    pub use crate::config::{LlmSettings, NoesisConfig, ProviderKind, RunnerSettings, TeamSettings};
    pub use crate::decision::DecisionCaller;
    pub use crate::error::{NoesisError, Result};
    pub use crate::llm::{
        LLMConfig, LLMProvider, LLMProviderFactory, LLMRequest, LLMResponse, Message, MessageRole,
        RetryConfig, ScriptedOracle, ScriptedReply, ToolCall, ToolDefinition,
    };
    pub use crate::parsing::{JsonParser, ParseError};
    pub use crate::registry::{
        CapabilityDescriptor, CapabilityRegistry, CapabilitySource, FieldKind, InputField,
        ParticipantCatalog, ResolveContext, StaticSource, TeamDefinition, TeamExport,
        TeamMemberSpec,
    };
    pub use crate::runner::{
        LoggingHooks, ProgressHooks, RunOutcome, RunStatus, RunnerConfig, ToolDispatcher,
        ToolInvocationRecord, ToolUseRunner,
    };
    pub use crate::team::{
        Blackboard, Coordinator, DelegationDecision, OracleCoordinator, OracleParticipant,
        Participant, RecursionContext, ScriptedCoordinator, Team, TeamEnvironment, TeamOutcome,
        TeamStatus,
    };
    pub use crate::tools::{
        FnTool, HandlerTool, Tool, ToolError, ToolErrorKind, ToolExecutionContext, ToolHandler,
        ToolMetadata, ToolResultEnvelope, ToolSchema, Toolbox,
    };
}
