//! Capability Registry
//!
//! The registry is the catalog of everything the oracle may call. It is
//! populated once at startup from [`CapabilitySource`]s, then asked to
//! resolve capabilities into live tools:
//!
//! - dependencies are constructed first (depth-first topological order)
//! - cycles and unknown required dependencies fail with
//!   [`NoesisError::UnresolvedDependency`]
//! - configuration bindings are looked up by dotted key in [`NoesisConfig`]
//! - a memo guarantees each capability is built at most once per resolution
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = CapabilityRegistry::new();
//! registry.discover(&[&papers_source, &graph_source])?;
//!
//! let toolbox = registry.resolve_all(&config)?;
//! let definitions = registry.list_capabilities();
//! ```

mod descriptor;
mod source;
mod teams;

pub use descriptor::{
    fields_to_schema, CapabilityDescriptor, CapabilityFactory, CapabilitySummary, ConfigBinding,
    Dependency, FieldKind, InputField, ResolveContext,
};
pub use source::{CapabilitySource, StaticSource};
pub use teams::{
    ParticipantCatalog, ParticipantSpec, TeamDefinition, TeamExport, TeamMemberSpec,
};

use crate::config::NoesisConfig;
use crate::error::{NoesisError, Result};
use crate::tools::{
    Tool, ToolError, ToolExecutionContext, ToolMetadata, ToolResultEnvelope, ToolSchema, Toolbox,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// What a discovery pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryReport {
    /// Capabilities newly registered
    pub registered: Vec<String>,
    /// Capabilities already registered by the same owner
    pub skipped: Vec<String>,
    /// Teams newly registered
    pub teams: Vec<String>,
}

#[derive(Debug, Clone)]
struct TeamEntry {
    owner: String,
    definition: TeamDefinition,
}

/// Catalog of capabilities and team definitions
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    descriptors: BTreeMap<String, CapabilityDescriptor>,
    teams: BTreeMap<String, TeamEntry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor
    ///
    /// Fails with [`NoesisError::DuplicateCapability`] if the name exists.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> Result<()> {
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(NoesisError::DuplicateCapability {
                name: descriptor.name,
            });
        }
        debug!(capability = %descriptor.name, owner = %descriptor.owner, "Registered capability");
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Register a team definition
    pub fn register_team(&mut self, definition: TeamDefinition) -> Result<()> {
        self.insert_team("default", definition)
    }

    fn insert_team(&mut self, owner: &str, definition: TeamDefinition) -> Result<()> {
        if self.teams.contains_key(&definition.name) {
            return Err(NoesisError::DuplicateTeam(definition.name));
        }
        definition.validate()?;
        self.teams.insert(
            definition.name.clone(),
            TeamEntry {
                owner: owner.to_string(),
                definition,
            },
        );
        Ok(())
    }

    /// Register everything the sources declare
    ///
    /// Running discovery twice over the same sources is a no-op: names
    /// already registered by the same owner are skipped. The same name from a
    /// different owner is a duplicate.
    pub fn discover(&mut self, sources: &[&dyn CapabilitySource]) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();

        for source in sources {
            let owner = source.name();

            for descriptor in source.capabilities() {
                let descriptor = descriptor.owned_by(owner);
                match self.descriptors.get(&descriptor.name) {
                    Some(existing) if existing.owner == owner => {
                        report.skipped.push(descriptor.name);
                    }
                    Some(_) => {
                        return Err(NoesisError::DuplicateCapability {
                            name: descriptor.name,
                        });
                    }
                    None => {
                        report.registered.push(descriptor.name.clone());
                        self.register(descriptor)?;
                    }
                }
            }

            for team in source.teams() {
                match self.teams.get(&team.name) {
                    Some(existing) if existing.owner == owner => {}
                    Some(_) => return Err(NoesisError::DuplicateTeam(team.name)),
                    None => {
                        report.teams.push(team.name.clone());
                        self.insert_team(owner, team)?;
                    }
                }
            }
        }

        info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            teams = report.teams.len(),
            "Capability discovery complete"
        );
        Ok(report)
    }

    /// Build one capability and its dependencies
    pub fn resolve(&self, name: &str, config: &NoesisConfig) -> Result<Arc<dyn Tool>> {
        Resolver::new(self, config).resolve(name)
    }

    /// Build every registered capability, sharing one memo
    pub fn resolve_all(&self, config: &NoesisConfig) -> Result<Toolbox> {
        let mut resolver = Resolver::new(self, config);
        let mut toolbox = Toolbox::new();
        for name in self.descriptors.keys() {
            toolbox.register(resolver.resolve(name)?)?;
        }
        debug!(tools = toolbox.len(), "Resolved capability catalog");
        Ok(toolbox)
    }

    /// `{name, description, input_schema}` for every capability, by name
    pub fn list_capabilities(&self) -> Vec<CapabilitySummary> {
        self.descriptors.values().map(CapabilitySummary::from).collect()
    }

    /// Markdown bullet list of capabilities
    pub fn describe_capabilities(&self) -> String {
        if self.descriptors.is_empty() {
            return "(no capabilities registered)".to_string();
        }
        self.descriptors
            .values()
            .map(|d| format!("- **{}**: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<&CapabilityDescriptor> {
        self.descriptors
            .values()
            .filter(|d| d.tags.iter().any(|t| t == tag))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.descriptors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn team(&self, name: &str) -> Result<&TeamDefinition> {
        self.teams
            .get(name)
            .map(|e| &e.definition)
            .ok_or_else(|| NoesisError::UnknownTeam(name.to_string()))
    }

    /// All team definitions, sorted by name
    pub fn teams(&self) -> Vec<&TeamDefinition> {
        self.teams.values().map(|e| &e.definition).collect()
    }
}

/// One resolution pass: memo plus the stack of capabilities being built
struct Resolver<'a> {
    registry: &'a CapabilityRegistry,
    config: &'a NoesisConfig,
    memo: HashMap<String, Arc<dyn Tool>>,
    visiting: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(registry: &'a CapabilityRegistry, config: &'a NoesisConfig) -> Self {
        Self {
            registry,
            config,
            memo: HashMap::new(),
            visiting: Vec::new(),
        }
    }

    fn resolve(&mut self, name: &str) -> Result<Arc<dyn Tool>> {
        if let Some(tool) = self.memo.get(name) {
            return Ok(Arc::clone(tool));
        }

        if let Some(pos) = self.visiting.iter().position(|n| n == name) {
            let mut cycle: Vec<&str> = self.visiting[pos..].iter().map(String::as_str).collect();
            cycle.push(name);
            return Err(NoesisError::UnresolvedDependency {
                capability: name.to_string(),
                reason: format!("dependency cycle: {}", cycle.join(" -> ")),
            });
        }

        let registry = self.registry;
        let descriptor = registry
            .get(name)
            .ok_or_else(|| NoesisError::UnknownTool(name.to_string()))?;

        self.visiting.push(name.to_string());
        let built = self.build(descriptor);
        self.visiting.pop();

        let built = built?;
        if built.name() != descriptor.name {
            return Err(NoesisError::Invariant(format!(
                "factory for '{}' built a tool named '{}'",
                descriptor.name,
                built.name()
            )));
        }

        let tool: Arc<dyn Tool> = Arc::new(DeclaredTool::new(descriptor, built));
        self.memo.insert(name.to_string(), Arc::clone(&tool));
        Ok(tool)
    }

    fn build(&mut self, descriptor: &CapabilityDescriptor) -> Result<Arc<dyn Tool>> {
        let mut dependencies = HashMap::new();
        for dependency in &descriptor.dependencies {
            if !self.registry.contains(&dependency.name) {
                if dependency.optional {
                    debug!(
                        capability = %descriptor.name,
                        dependency = %dependency.name,
                        "Skipping unknown optional dependency"
                    );
                    continue;
                }
                return Err(NoesisError::UnresolvedDependency {
                    capability: descriptor.name.clone(),
                    reason: format!("unknown dependency '{}'", dependency.name),
                });
            }
            let tool = self.resolve(&dependency.name)?;
            dependencies.insert(dependency.name.clone(), tool);
        }

        let mut params = Map::new();
        for binding in &descriptor.bindings {
            let value = self
                .config
                .lookup(&binding.key)
                .filter(|v| !v.is_null())
                .or_else(|| binding.default.clone());
            match value {
                Some(value) => {
                    params.insert(binding.param.clone(), value);
                }
                None if binding.required => {
                    return Err(NoesisError::MissingConfig {
                        capability: descriptor.name.clone(),
                        param: binding.param.clone(),
                        key: binding.key.clone(),
                    });
                }
                None => {}
            }
        }

        descriptor.build(ResolveContext::new(&descriptor.name, dependencies, params))
    }
}

/// A built tool advertised under its descriptor's description and schema
struct DeclaredTool {
    metadata: ToolMetadata,
    schema: ToolSchema,
    inner: Arc<dyn Tool>,
}

impl DeclaredTool {
    fn new(descriptor: &CapabilityDescriptor, inner: Arc<dyn Tool>) -> Self {
        Self {
            metadata: ToolMetadata::new(descriptor.name.clone(), descriptor.description.clone()),
            schema: descriptor.input_schema.clone(),
            inner,
        }
    }
}

#[async_trait]
impl Tool for DeclaredTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ToolExecutionContext,
    ) -> std::result::Result<ToolResultEnvelope, ToolError> {
        self.inner.execute(args, ctx).await
    }
}

impl CapabilitySource for NoesisConfig {
    fn name(&self) -> &str {
        "config"
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        Vec::new()
    }

    fn teams(&self) -> Vec<TeamDefinition> {
        self.teams.clone()
    }
}
