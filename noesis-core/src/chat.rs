//! Top-level assistant
//!
//! Wires discovery, resolution, the participant catalog and the team tools
//! into one tool-use loop. A [`ChatSession`] keeps the conversation between
//! turns; only the user message and the final answer of a completed run are
//! kept, tool traffic is dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let assistant = AssistantBuilder::new(NoesisConfig::load()?)
//!     .with_source(papers_source)
//!     .build()?;
//!
//! let mut session = assistant.session();
//! let outcome = session.send("Which papers cite the transformer paper?").await;
//! println!("{}", outcome.text);
//! ```

use crate::config::NoesisConfig;
use crate::error::Result;
use crate::llm::{LLMProvider, LLMProviderFactory, Message, ToolDefinition};
use crate::prompts::ASSISTANT_SYSTEM;
use crate::registry::{
    CapabilityRegistry, CapabilitySource, ParticipantCatalog, TeamDefinition, TeamExport,
};
use crate::runner::{NoopHooks, ProgressHooks, RunOutcome, RunnerConfig, ToolUseRunner};
use crate::team::{team_toolbox, Coordinator, OracleParticipant, Participant, TeamEnvironment};
use crate::tools::{ToolExecutionContext, Toolbox};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Builds an [`Assistant`] from configuration and discovery sources
pub struct AssistantBuilder {
    config: NoesisConfig,
    oracle: Option<Arc<dyn LLMProvider>>,
    sources: Vec<Arc<dyn CapabilitySource>>,
    participants: Vec<(Arc<dyn Participant>, Option<TeamExport>)>,
    hooks: Arc<dyn ProgressHooks>,
    coordinator: Option<Arc<dyn Coordinator>>,
}

impl AssistantBuilder {
    pub fn new(config: NoesisConfig) -> Self {
        Self {
            config,
            oracle: None,
            sources: Vec::new(),
            participants: Vec::new(),
            hooks: Arc::new(NoopHooks),
            coordinator: None,
        }
    }

    /// Use this oracle instead of the configured provider
    pub fn with_oracle(mut self, oracle: Arc<dyn LLMProvider>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_source(mut self, source: impl CapabilitySource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn with_participant(mut self, participant: Arc<dyn Participant>) -> Self {
        self.participants.push((participant, None));
        self
    }

    /// Add a participant that ad-hoc teams may recruit
    pub fn with_exported_participant(
        mut self,
        participant: Arc<dyn Participant>,
        export: TeamExport,
    ) -> Self {
        self.participants.push((participant, Some(export)));
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ProgressHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Coordinator used by every team, replacing the oracle-backed one
    pub fn with_coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Discover, resolve and wire everything
    ///
    /// # Errors
    ///
    /// Registry errors (duplicates, unresolved dependencies, missing
    /// configuration) and provider construction errors surface here.
    pub fn build(self) -> Result<Assistant> {
        let config = self.config;
        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => LLMProviderFactory::create(&config.llm)?,
        };

        let mut registry = CapabilityRegistry::new();
        let mut sources: Vec<&dyn CapabilitySource> =
            self.sources.iter().map(|s| s.as_ref()).collect();
        sources.push(&config);
        registry.discover(&sources)?;
        let toolbox = registry.resolve_all(&config)?;

        let mut catalog = ParticipantCatalog::new();
        for (participant, export) in self.participants {
            match export {
                Some(export) => catalog.register_exported(participant, export)?,
                None => catalog.register(participant)?,
            }
        }
        for spec in &config.participants {
            let participant = Arc::new(
                OracleParticipant::new(&spec.name, &spec.instructions, Arc::clone(&oracle))
                    .with_description(&spec.description)
                    .with_config(config.llm.generation()),
            );
            match &spec.export {
                Some(export) => catalog.register_exported(participant, export.clone())?,
                None => catalog.register(participant)?,
            }
        }

        let runner = RunnerConfig::from_settings(&config.runner, &config.llm);
        let mut env = TeamEnvironment::new(
            Arc::clone(&oracle),
            Arc::new(toolbox.clone()),
            Arc::new(registry),
            Arc::new(catalog),
        )
        .with_settings(config.team.clone())
        .with_runner(runner.clone())
        .with_hooks(Arc::clone(&self.hooks));
        if let Some(coordinator) = self.coordinator {
            env = env.with_coordinator(coordinator);
        }
        let env = Arc::new(env);

        let mut dispatcher = toolbox;
        dispatcher.merge(&team_toolbox(&env)?)?;

        let system_prompt = ASSISTANT_SYSTEM.render(&crate::prompt_vars! {
            "capabilities" => env.registry().describe_capabilities(),
            "teams" => describe_teams(&env.registry().teams()),
        })?;

        info!(
            tools = dispatcher.len(),
            teams = env.registry().teams().len(),
            participants = env.participants().len(),
            model = %oracle.model_info().model_name,
            "Assistant ready"
        );

        Ok(Assistant {
            oracle,
            dispatcher: Arc::new(dispatcher),
            env,
            runner,
            system_prompt,
            hooks: self.hooks,
        })
    }
}

fn describe_teams(teams: &[&TeamDefinition]) -> String {
    if teams.is_empty() {
        return "(no teams defined)".to_string();
    }
    teams
        .iter()
        .map(|t| {
            let roles: Vec<&str> = t.members.iter().map(|m| m.role.as_str()).collect();
            format!("- **{}**: {} (roles: {})", t.name, t.description, roles.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A wired assistant; cheap to share, one per process
pub struct Assistant {
    oracle: Arc<dyn LLMProvider>,
    dispatcher: Arc<Toolbox>,
    env: Arc<TeamEnvironment>,
    runner: RunnerConfig,
    system_prompt: String,
    hooks: Arc<dyn ProgressHooks>,
}

impl Assistant {
    /// Start a conversation
    pub fn session(&self) -> ChatSession {
        let id = Uuid::new_v4().to_string();
        let runner = ToolUseRunner::new(Arc::clone(&self.oracle), self.dispatcher.clone())
            .with_system_prompt(self.system_prompt.clone())
            .with_config(self.runner.clone())
            .with_hooks(Arc::clone(&self.hooks))
            .with_context(ToolExecutionContext::new().with_trace_id(id.clone()));
        debug!(session = %id, "Chat session started");
        ChatSession {
            id,
            runner,
            history: Vec::new(),
        }
    }

    /// Tools offered to the oracle, including team tools
    pub fn tool_names(&self) -> Vec<&str> {
        self.dispatcher.names()
    }

    /// Definitions offered to the oracle, including team tools
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.dispatcher.definitions()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn environment(&self) -> &Arc<TeamEnvironment> {
        &self.env
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        self.env.registry()
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("tools", &self.tool_names())
            .field("runner", &self.runner)
            .finish()
    }
}

/// One conversation with the assistant
pub struct ChatSession {
    id: String,
    runner: ToolUseRunner,
    history: Vec<Message>,
}

impl ChatSession {
    /// Send a user message and run the loop to its end
    pub async fn send(&mut self, user: &str) -> RunOutcome {
        let limit = self.runner.config().max_iterations;
        self.send_with_limit(user, limit).await
    }

    /// Like [`send`](Self::send) with the iteration ceiling lowered to `limit`
    pub async fn send_with_limit(&mut self, user: &str, limit: u32) -> RunOutcome {
        let mut messages = self.history.clone();
        messages.push(Message::user(user));

        let outcome = self.runner.run_with_limit(messages, limit).await;
        if outcome.is_completed() {
            self.history.push(Message::user(user));
            self.history.push(Message::assistant(outcome.text.clone()));
        }
        outcome
    }

    /// Trace id stamped on every tool call of this session
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Promoted conversation so far
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
