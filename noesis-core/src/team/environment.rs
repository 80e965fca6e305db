//! Shared environment for team runs
//!
//! Everything a team, its members and their research sessions need to reach
//! lives here: the default oracle, the external toolbox, the registry's team
//! definitions and the participant catalog. Built once and shared behind an
//! `Arc`.

use super::coordinator::{Coordinator, OracleCoordinator};
use super::engine::{Team, TeamMember};
use super::role::{RecursionContext, RoleScoped};
use crate::config::TeamSettings;
use crate::error::{NoesisError, Result};
use crate::llm::LLMProvider;
use crate::registry::{CapabilityRegistry, ParticipantCatalog, TeamDefinition};
use crate::runner::{NoopHooks, ProgressHooks, RunnerConfig};
use crate::tools::Toolbox;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct TeamEnvironment {
    oracle: Arc<dyn LLMProvider>,
    toolbox: Arc<Toolbox>,
    registry: Arc<CapabilityRegistry>,
    participants: Arc<ParticipantCatalog>,
    settings: TeamSettings,
    runner: RunnerConfig,
    coordinator: Option<Arc<dyn Coordinator>>,
    hooks: Arc<dyn ProgressHooks>,
    meta_log: Mutex<VecDeque<String>>,
}

impl TeamEnvironment {
    pub fn new(
        oracle: Arc<dyn LLMProvider>,
        toolbox: Arc<Toolbox>,
        registry: Arc<CapabilityRegistry>,
        participants: Arc<ParticipantCatalog>,
    ) -> Self {
        Self {
            oracle,
            toolbox,
            registry,
            participants,
            settings: TeamSettings::default(),
            runner: RunnerConfig::default(),
            coordinator: None,
            hooks: Arc::new(NoopHooks),
            meta_log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_settings(mut self, settings: TeamSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }

    /// Use `coordinator` for every team instead of an oracle-backed one
    pub fn with_coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Hooks attached to research sessions
    pub fn with_hooks(mut self, hooks: Arc<dyn ProgressHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn oracle(&self) -> Arc<dyn LLMProvider> {
        Arc::clone(&self.oracle)
    }

    /// External capabilities, without team tools
    pub fn toolbox(&self) -> &Toolbox {
        &self.toolbox
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn participants(&self) -> &ParticipantCatalog {
        &self.participants
    }

    pub fn settings(&self) -> &TeamSettings {
        &self.settings
    }

    pub fn runner_config(&self) -> &RunnerConfig {
        &self.runner
    }

    pub fn hooks(&self) -> Arc<dyn ProgressHooks> {
        Arc::clone(&self.hooks)
    }

    pub(crate) fn record_meta(&self, summary: String) {
        let capacity = self.settings.meta_log_capacity;
        if capacity == 0 {
            return;
        }
        let mut log = self.meta_log.lock().unwrap_or_else(|e| e.into_inner());
        while log.len() >= capacity {
            log.pop_front();
        }
        log.push_back(summary);
    }

    /// Most recent research meta summaries, oldest first
    pub fn meta_log(&self) -> Vec<String> {
        self.meta_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Drain the meta summaries collected so far
    pub fn take_meta_log(&self) -> Vec<String> {
        self.meta_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    fn coordinator(&self) -> Arc<dyn Coordinator> {
        match &self.coordinator {
            Some(coordinator) => Arc::clone(coordinator),
            None => Arc::new(
                OracleCoordinator::new(Arc::clone(&self.oracle))
                    .with_temperature(self.settings.coordinator_temperature)
                    .with_max_retries(self.settings.decision_max_retries)
                    .with_retry(self.runner.retry.clone()),
            ),
        }
    }

    /// Instantiate a declared team whose members run at `depth`
    pub fn build_team(
        self: &Arc<Self>,
        definition: &TeamDefinition,
        depth: usize,
        max_turns: Option<u32>,
    ) -> Result<Team> {
        let mut team = Team::new(definition.name.clone(), self.coordinator())
            .with_max_turns(max_turns.unwrap_or(definition.default_max_turns));

        for spec in &definition.members {
            let participant = self.participants.get(&spec.participant)?;
            let description = if spec.description.is_empty() {
                participant.description().to_string()
            } else {
                spec.description.clone()
            };
            let member = RoleScoped::new(
                participant,
                spec.role.clone(),
                RecursionContext::new(depth, definition.max_depth),
                Arc::clone(self),
            )
            .with_instructions(spec.instructions.clone())
            .with_description(description.clone());

            team = team.with_member(TeamMember::new(spec.role.clone(), description, Arc::new(member)))?;
        }

        debug!(team = %definition.name, depth, members = definition.members.len(), "Built team");
        Ok(team)
    }

    /// Assemble a one-off team from catalog participants
    ///
    /// Roles come from each participant's team export, falling back to its
    /// name; a repeated role gets a numeric suffix.
    pub fn build_ad_hoc_team(
        self: &Arc<Self>,
        participant_names: &[String],
        depth: usize,
        max_turns: Option<u32>,
    ) -> Result<Team> {
        if participant_names.len() < 2 {
            return Err(NoesisError::Configuration(
                "an ad-hoc team needs at least 2 participants".to_string(),
            ));
        }

        let name = format!(
            "ad_hoc_{}",
            participant_names
                .iter()
                .take(3)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("_")
        );
        let mut team = Team::new(name, self.coordinator())
            .with_max_turns(max_turns.unwrap_or(self.settings.default_max_turns));

        let mut roles: HashSet<String> = HashSet::new();
        for participant_name in participant_names {
            let participant = self.participants.get(participant_name)?;
            let (base_role, description) = match self.participants.export(participant_name) {
                Some(export) => (export.default_role.clone(), export.description.clone()),
                None => (
                    participant_name.clone(),
                    participant.description().to_string(),
                ),
            };

            let mut role = base_role.clone();
            let mut suffix = 2;
            while roles.contains(&role) {
                role = format!("{}_{}", base_role, suffix);
                suffix += 1;
            }
            roles.insert(role.clone());

            let member = RoleScoped::new(
                participant,
                role.clone(),
                RecursionContext::new(depth, self.settings.max_depth),
                Arc::clone(self),
            )
            .with_description(description.clone());

            team = team.with_member(TeamMember::new(role, description, Arc::new(member)))?;
        }

        Ok(team)
    }
}

impl std::fmt::Debug for TeamEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamEnvironment")
            .field("toolbox", &self.toolbox)
            .field("participants", &self.participants)
            .field("settings", &self.settings)
            .finish()
    }
}
