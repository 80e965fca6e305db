//! Discovery sources
//!
//! A source is a static registration table: each component that contributes
//! capabilities or teams exposes one, and the registry's `discover` walks
//! them at startup.

use super::descriptor::CapabilityDescriptor;
use super::teams::TeamDefinition;

/// Something that declares capabilities and teams
pub trait CapabilitySource: Send + Sync {
    /// Owner name recorded on every descriptor this source declares
    fn name(&self) -> &str;

    fn capabilities(&self) -> Vec<CapabilityDescriptor>;

    fn teams(&self) -> Vec<TeamDefinition> {
        Vec::new()
    }
}

/// A fixed list of descriptors and teams
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    capabilities: Vec<CapabilityDescriptor>,
    teams: Vec<TeamDefinition>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            teams: Vec::new(),
        }
    }

    /// Add a capability; its owner is set to this source
    pub fn with_capability(mut self, descriptor: CapabilityDescriptor) -> Self {
        let descriptor = descriptor.owned_by(self.name.clone());
        self.capabilities.push(descriptor);
        self
    }

    pub fn with_team(mut self, team: TeamDefinition) -> Self {
        self.teams.push(team);
        self
    }
}

impl CapabilitySource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities.clone()
    }

    fn teams(&self) -> Vec<TeamDefinition> {
        self.teams.clone()
    }
}
