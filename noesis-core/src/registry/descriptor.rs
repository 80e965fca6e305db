//! Capability descriptors
//!
//! A descriptor is the static declaration of a capability: its oracle-facing
//! shape, what it depends on, which configuration keys feed its constructor,
//! and a factory that builds the live tool once all of that is resolved.

use crate::error::{NoesisError, Result};
use crate::tools::{Tool, ToolSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a live tool from resolved dependencies and parameters
pub type CapabilityFactory = Arc<dyn Fn(ResolveContext) -> Result<Arc<dyn Tool>> + Send + Sync>;

/// A dependency on another capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    /// Unknown optional dependencies are skipped instead of failing
    #[serde(default)]
    pub optional: bool,
}

/// Constructor parameter fed from a dotted configuration key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBinding {
    /// Parameter name as seen by the factory
    pub param: String,
    /// Dotted configuration key, e.g. `settings.papers.dir`
    pub key: String,
    /// Used when the key is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub required: bool,
}

/// Primitive field kinds for simple input declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    fn schema(self) -> Value {
        match self {
            FieldKind::String => serde_json::json!({"type": "string"}),
            FieldKind::Integer => serde_json::json!({"type": "integer"}),
            FieldKind::Number => serde_json::json!({"type": "number"}),
            FieldKind::Boolean => serde_json::json!({"type": "boolean"}),
            FieldKind::Array => serde_json::json!({"type": "array", "items": {"type": "string"}}),
            FieldKind::Object => serde_json::json!({"type": "object"}),
        }
    }
}

/// One typed input field, convertible to JSON Schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

fn default_required() -> bool {
    true
}

impl InputField {
    pub fn new(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
            enum_values: Vec::new(),
        }
    }

    /// Mark the field optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// Convert typed fields into an object JSON Schema
pub fn fields_to_schema(fields: &[InputField]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in fields {
        let mut prop = field.kind.schema();
        prop["description"] = Value::String(field.description.clone());
        if let Some(default) = &field.default {
            prop["default"] = default.clone();
        }
        if !field.enum_values.is_empty() {
            prop["enum"] = serde_json::json!(field.enum_values);
        }
        properties.insert(field.name.clone(), prop);
        if field.required {
            required.push(Value::String(field.name.clone()));
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Static declaration of a capability
#[derive(Clone)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
    /// Source that declared this capability
    pub owner: String,
    pub dependencies: Vec<Dependency>,
    pub bindings: Vec<ConfigBinding>,
    pub tags: Vec<String>,
    factory: CapabilityFactory,
}

impl CapabilityDescriptor {
    /// Create a descriptor with no dependencies or bindings
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ResolveContext) -> Result<Arc<dyn Tool>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: ToolSchema::empty(),
            owner: "default".to_string(),
            dependencies: Vec::new(),
            bindings: Vec::new(),
            tags: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn with_schema(mut self, schema: ToolSchema) -> Self {
        self.input_schema = schema;
        self
    }

    /// Declare the input shape from typed fields
    pub fn with_fields(mut self, fields: &[InputField]) -> Self {
        self.input_schema = ToolSchema::new(fields_to_schema(fields));
        self
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency {
            name: name.into(),
            optional: false,
        });
        self
    }

    pub fn optionally_depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency {
            name: name.into(),
            optional: true,
        });
        self
    }

    /// Bind a required parameter to a configuration key
    pub fn bind(mut self, param: impl Into<String>, key: impl Into<String>) -> Self {
        self.bindings.push(ConfigBinding {
            param: param.into(),
            key: key.into(),
            default: None,
            required: true,
        });
        self
    }

    /// Bind a parameter with a fallback value
    pub fn bind_or(mut self, param: impl Into<String>, key: impl Into<String>, default: Value) -> Self {
        self.bindings.push(ConfigBinding {
            param: param.into(),
            key: key.into(),
            default: Some(default),
            required: true,
        });
        self
    }

    /// Bind a parameter that may stay unset
    pub fn bind_optional(mut self, param: impl Into<String>, key: impl Into<String>) -> Self {
        self.bindings.push(ConfigBinding {
            param: param.into(),
            key: key.into(),
            default: None,
            required: false,
        });
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub(crate) fn build(&self, ctx: ResolveContext) -> Result<Arc<dyn Tool>> {
        (self.factory)(ctx)
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("dependencies", &self.dependencies)
            .field("bindings", &self.bindings)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Inputs handed to a capability factory
#[derive(Clone)]
pub struct ResolveContext {
    /// Name of the capability being built
    pub name: String,
    dependencies: HashMap<String, Arc<dyn Tool>>,
    params: Map<String, Value>,
}

impl ResolveContext {
    pub(crate) fn new(
        name: impl Into<String>,
        dependencies: HashMap<String, Arc<dyn Tool>>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            dependencies,
            params,
        }
    }

    /// A declared, resolved dependency
    pub fn dependency(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.dependencies
            .get(name)
            .cloned()
            .ok_or_else(|| NoesisError::UnresolvedDependency {
                capability: self.name.clone(),
                reason: format!("dependency '{}' was not resolved", name),
            })
    }

    /// An optional dependency, if it was available
    pub fn optional_dependency(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.dependencies.get(name).cloned()
    }

    /// Raw parameter value
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Parameter deserialized into `T`
    pub fn param_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.params
            .get(name)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| {
                    NoesisError::Configuration(format!(
                        "parameter '{}' of '{}': {}",
                        name, self.name, e
                    ))
                })
            })
            .transpose()
    }
}

/// Oracle-facing summary of a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySummary {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<&CapabilityDescriptor> for CapabilitySummary {
    fn from(descriptor: &CapabilityDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            input_schema: descriptor.input_schema.parameters.clone(),
        }
    }
}
