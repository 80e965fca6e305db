//! Prompt templates
//!
//! Templates use `{{name}}` placeholders. Rendering fails on a placeholder
//! with no value so a half-filled prompt never reaches the oracle.

use crate::error::{NoesisError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());

/// A prompt with `{{name}}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: &'static str,
    source: &'static str,
}

impl PromptTemplate {
    pub const fn new(name: &'static str, source: &'static str) -> Self {
        Self { name, source }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Placeholder names in order of first appearance
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for caps in PLACEHOLDER_RE.captures_iter(self.source) {
            if let Some(m) = caps.get(1) {
                if !names.contains(&m.as_str()) {
                    names.push(m.as_str());
                }
            }
        }
        names
    }

    /// Substitute every placeholder
    pub fn render(&self, vars: &HashMap<&str, String>) -> Result<String> {
        if let Some(missing) = self.variables().into_iter().find(|v| !vars.contains_key(v)) {
            return Err(NoesisError::Template(format!(
                "template '{}' needs '{}'",
                self.name, missing
            )));
        }

        Ok(PLACEHOLDER_RE
            .replace_all(self.source, |caps: &regex::Captures<'_>| {
                vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned())
    }
}

/// Shorthand for building template variables
#[macro_export]
macro_rules! prompt_vars {
    ($($key:literal => $value:expr),* $(,)?) => {{
        let mut vars = ::std::collections::HashMap::<&str, String>::new();
        $(vars.insert($key, ($value).to_string());)*
        vars
    }};
}

pub const COORDINATOR_SYSTEM: PromptTemplate = PromptTemplate::new(
    "coordinator_system",
    "You coordinate the team \"{{team}}\". You never do the work yourself. \
Each turn you either delegate one step to a team member or terminate.\n\
\n\
Rules:\n\
- Delegate to members by their exact role name.\n\
- input_keys may only name keys that are already on the blackboard.\n\
- Give each delegation a short, concrete instruction.\n\
- Terminate as soon as a blackboard entry answers the task, naming it in output_key.",
);

pub const COORDINATOR_DECISION: PromptTemplate = PromptTemplate::new(
    "coordinator_decision",
    "## Task\n{{task}}\n\
\n\
## Team members\n{{roster}}\n\
\n\
## Blackboard\n{{blackboard}}\n\
\n\
## History\n{{history}}\n\
\n\
This is turn {{turn}} of {{max_turns}}. Decide the next step.",
);

pub const RESEARCH_PREAMBLE: PromptTemplate = PromptTemplate::new(
    "research_preamble",
    "You are acting as {{role}}.\n\
{{instructions}}\n\
\n\
You are in research mode at depth {{depth}} of {{max_depth}}. Use the available \
tools to gather what you need, then answer with your findings as plain text. \
Deeper research and sub-teams are only available while depth allows.",
);

pub const ASSISTANT_SYSTEM: PromptTemplate = PromptTemplate::new(
    "assistant_system",
    "You are a research assistant with access to backend capabilities. Call tools \
whenever they help; answer directly when they do not.\n\
\n\
## Capabilities\n{{capabilities}}\n\
\n\
## Teams\n{{teams}}\n\
\n\
Use run_team for a predefined team, run_ad_hoc_team to assemble members for a \
one-off task, and list_teams to see what is available.",
);
