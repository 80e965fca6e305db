//! Configuration types for Noesis
//!
//! Configuration is layered with figment: built-in defaults, then
//! `noesis.toml` (user config dir, working directory, `NOESIS_CONFIG_PATH`),
//! then `NOESIS_*` environment variables split on `__`
//! (`NOESIS_RUNNER__MAX_ITERATIONS=5`). The conventional `LLM_*` variables
//! are applied last.

use crate::error::{NoesisError, Result};
use crate::llm::{LLMConfig, RetryConfig};
use crate::registry::{ParticipantSpec, TeamDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoesisConfig {
    /// Oracle connection settings
    pub llm: LlmSettings,

    /// Tool-use loop settings
    pub runner: RunnerSettings,

    /// Team and recursion settings
    pub team: TeamSettings,

    /// Participants declared in configuration
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<ParticipantSpec>,

    /// Teams declared in configuration
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<TeamDefinition>,

    /// Free-form values for capability configuration bindings
    pub settings: Map<String, Value>,
}

/// Supported oracle backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    /// Offline oracle that always answers with a fixed text
    Stub,
}

impl std::str::FromStr for ProviderKind {
    type Err = NoesisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "stub" => Ok(ProviderKind::Stub),
            other => Err(NoesisError::Configuration(format!(
                "Invalid LLM provider: {}",
                other
            ))),
        }
    }
}

/// Oracle connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,

    /// Model name; the provider default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    pub max_tokens: usize,

    pub temperature: f32,

    /// Per-request transport timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model: None,
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout: Duration::from_secs(120),
        }
    }
}

impl LlmSettings {
    /// Generation settings for plain oracle calls
    pub fn generation(&self) -> LLMConfig {
        LLMConfig::new()
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

/// Tool-use loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Oracle round trips allowed per run
    pub max_iterations: u32,

    /// Dispatch sibling tool calls concurrently
    pub parallel_tools: bool,

    /// Backoff for transient oracle failures
    pub retry: RetryConfig,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            parallel_tools: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Team and recursion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamSettings {
    /// Coordinator turns when a team does not say otherwise
    pub default_max_turns: u32,

    /// Recursion ceiling for role-scoped participants
    pub max_depth: usize,

    pub coordinator_temperature: f32,

    /// Extra attempts for coordinator decisions
    pub decision_max_retries: u32,

    /// Iteration ceiling of a research sub-session
    pub research_max_iterations: u32,

    /// Research meta summaries kept in memory; oldest are dropped first
    pub meta_log_capacity: usize,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            default_max_turns: 10,
            max_depth: 2,
            coordinator_temperature: 0.3,
            decision_max_retries: 2,
            research_max_iterations: 10,
            meta_log_capacity: 64,
        }
    }
}

impl NoesisConfig {
    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Toml},
            Figment,
        };

        let mut figment = Figment::from(Serialized::defaults(NoesisConfig::default()));

        if let Some(dir) = dirs::config_dir() {
            figment = figment.merge(Toml::file(dir.join("noesis").join("noesis.toml")));
        }
        figment = figment.merge(Toml::file("noesis.toml"));

        if let Ok(path) = std::env::var("NOESIS_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let mut config: NoesisConfig = figment
            .merge(Env::prefixed("NOESIS_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                NoesisError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.apply_llm_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            providers::{Format, Serialized, Toml},
            Figment,
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(NoesisError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: NoesisConfig = Figment::from(Serialized::defaults(NoesisConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                NoesisError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Default location of the user configuration file
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("noesis").join("noesis.toml"))
    }

    /// Apply `LLM_*` overrides read through `var`.
    fn apply_llm_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(provider) = var("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = var("LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(base_url) = var("LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }

        let key = var("LLM_API_KEY").or_else(|| match self.llm.provider {
            ProviderKind::Anthropic => var("ANTHROPIC_API_KEY"),
            ProviderKind::Stub => None,
        });
        if let Some(key) = key {
            self.llm.api_key = Some(key);
        }
        Ok(())
    }

    /// Value at a dotted path, e.g. `settings.papers.dir` or `team.max_depth`
    pub fn lookup(&self, dotted: &str) -> Option<Value> {
        let root = serde_json::to_value(self).ok()?;
        dotted
            .split('.')
            .try_fold(&root, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
            .cloned()
    }

    /// Set a value in the free-form settings table at a dotted path
    pub fn set_setting(&mut self, dotted: &str, value: Value) {
        let mut segments: Vec<&str> = dotted.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut node = &mut self.settings;
        for segment in segments {
            let entry = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            node = map;
        }
        node.insert(last.to_string(), value);
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a ceiling is zero or a temperature is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.runner.max_iterations == 0 {
            return Err(NoesisError::Configuration(
                "runner.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.team.default_max_turns == 0 {
            return Err(NoesisError::Configuration(
                "team.default_max_turns must be at least 1".to_string(),
            ));
        }
        if self.team.research_max_iterations == 0 {
            return Err(NoesisError::Configuration(
                "team.research_max_iterations must be at least 1".to_string(),
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(NoesisError::Configuration(
                "llm.max_tokens must be at least 1".to_string(),
            ));
        }
        for (name, temperature) in [
            ("llm.temperature", self.llm.temperature),
            ("team.coordinator_temperature", self.team.coordinator_temperature),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(NoesisError::Configuration(format!(
                    "{} must be between 0.0 and 2.0, got {}",
                    name, temperature
                )));
            }
        }
        for team in &self.teams {
            team.validate()?;
        }
        Ok(())
    }
}
