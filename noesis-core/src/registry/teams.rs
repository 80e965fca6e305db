//! Team definitions and the participant catalog

use crate::error::{NoesisError, Result};
use crate::team::Participant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One member slot of a team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMemberSpec {
    /// Role name the coordinator delegates to
    pub role: String,
    /// Registered participant that plays the role
    pub participant: String,
    /// Role instructions layered over the participant's own
    #[serde(default)]
    pub instructions: String,
    /// One-line description shown in the roster
    #[serde(default)]
    pub description: String,
}

impl TeamMemberSpec {
    pub fn new(role: impl Into<String>, participant: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            participant: participant.into(),
            instructions: String::new(),
            description: String::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A named, declared team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub members: Vec<TeamMemberSpec>,
    #[serde(default = "default_max_turns")]
    pub default_max_turns: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_max_turns() -> u32 {
    10
}

fn default_max_depth() -> usize {
    2
}

impl TeamDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: description.into(),
            members: Vec::new(),
            default_max_turns: default_max_turns(),
            max_depth: default_max_depth(),
            tags: Vec::new(),
        }
    }

    pub fn with_member(mut self, member: TeamMemberSpec) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.default_max_turns = max_turns;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Reject empty rosters and duplicate roles
    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(NoesisError::Configuration(format!(
                "team '{}' has no members",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for member in &self.members {
            if !seen.insert(member.role.as_str()) {
                return Err(NoesisError::Configuration(format!(
                    "team '{}' declares role '{}' twice",
                    self.name, member.role
                )));
            }
        }
        if self.default_max_turns == 0 {
            return Err(NoesisError::Configuration(format!(
                "team '{}' must allow at least one turn",
                self.name
            )));
        }
        Ok(())
    }
}

/// Ad-hoc team membership data attached to a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamExport {
    /// Role the participant takes when nothing else is specified
    pub default_role: String,
    pub description: String,
}

/// Participant declared in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<TeamExport>,
}

#[derive(Clone)]
struct CatalogEntry {
    participant: Arc<dyn Participant>,
    export: Option<TeamExport>,
}

/// Named participants available to teams
#[derive(Clone, Default)]
pub struct ParticipantCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ParticipantCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant under its own name
    pub fn register(&mut self, participant: Arc<dyn Participant>) -> Result<()> {
        self.insert(participant, None)
    }

    /// Register a participant usable in ad-hoc teams
    pub fn register_exported(
        &mut self,
        participant: Arc<dyn Participant>,
        export: TeamExport,
    ) -> Result<()> {
        self.insert(participant, Some(export))
    }

    fn insert(&mut self, participant: Arc<dyn Participant>, export: Option<TeamExport>) -> Result<()> {
        let name = participant.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(NoesisError::Configuration(format!(
                "participant '{}' registered twice",
                name
            )));
        }
        self.entries.insert(
            name,
            CatalogEntry {
                participant,
                export,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Participant>> {
        self.entries
            .get(name)
            .map(|e| Arc::clone(&e.participant))
            .ok_or_else(|| NoesisError::UnknownParticipant(name.to_string()))
    }

    pub fn export(&self, name: &str) -> Option<&TeamExport> {
        self.entries.get(name).and_then(|e| e.export.as_ref())
    }

    /// Participants that may join ad-hoc teams, sorted by name
    pub fn exported(&self) -> Vec<(&str, &TeamExport)> {
        self.entries
            .iter()
            .filter_map(|(name, e)| e.export.as_ref().map(|x| (name.as_str(), x)))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ParticipantCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantCatalog")
            .field("participants", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_definition_defaults() {
        let def: TeamDefinition = serde_json::from_value(serde_json::json!({
            "name": "review",
            "members": [
                {"role": "reader", "participant": "analyst"},
                {"role": "critic", "participant": "analyst", "description": "Finds gaps"}
            ]
        }))
        .unwrap();

        assert_eq!(def.default_max_turns, 10);
        assert_eq!(def.max_depth, 2);
        assert_eq!(def.members[1].description, "Finds gaps");
        def.validate().unwrap();
    }

    #[test]
    fn test_duplicate_role_rejected() {
        let def = TeamDefinition::new("t", "")
            .with_member(TeamMemberSpec::new("a", "p"))
            .with_member(TeamMemberSpec::new("a", "q"));
        assert!(def.validate().is_err());
        assert!(TeamDefinition::new("empty", "").validate().is_err());
    }
}
