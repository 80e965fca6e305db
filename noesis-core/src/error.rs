//! Error types for Noesis operations

/// Result type for Noesis operations
pub type Result<T> = std::result::Result<T, NoesisError>;

/// Error types for the orchestration engine.
///
/// Registry variants are static misconfiguration and surface at startup.
/// Everything the oracle can correct on a later turn (unknown tools, tool
/// failures, invalid delegations) is fed back into the conversation instead
/// of being returned through this type; the variants exist so callers and
/// tools can name those conditions.
#[derive(Debug, thiserror::Error)]
pub enum NoesisError {
    /// A capability with this name is already registered
    #[error("Duplicate capability: {name}")]
    DuplicateCapability { name: String },

    /// A dependency is unknown or part of a cycle
    #[error("Unresolved dependency for '{capability}': {reason}")]
    UnresolvedDependency { capability: String, reason: String },

    /// A required configuration binding has no value
    #[error("Missing configuration '{key}' for parameter '{param}' of '{capability}'")]
    MissingConfig {
        capability: String,
        param: String,
        key: String,
    },

    /// A team with this name is already registered
    #[error("Duplicate team: {0}")]
    DuplicateTeam(String),

    /// No team registered under this name
    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    /// No participant registered under this name
    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    /// The oracle never produced a schema-conforming answer
    #[error("Decision format error after {attempts} attempt(s): {reason}")]
    DecisionFormat { attempts: u32, reason: String },

    /// The oracle asked for a tool nobody provides
    #[error("Unknown capability: {0}")]
    UnknownTool(String),

    /// A tool handler reported a failure
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// The coordinator referenced an unknown member or blackboard key
    #[error("Invalid delegation: {0}")]
    InvalidDelegation(String),

    /// Blackboard read on a key that was never written
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Retryable oracle failure (rate limit, overload, network)
    #[error("Transient oracle error: {0}")]
    OracleTransient(String),

    /// Non-retryable oracle failure
    #[error("Oracle error: {0}")]
    OracleHard(String),

    /// The oracle answered, but not in a parseable shape
    #[error("Malformed oracle output: {0}")]
    MalformedOutput(String),

    /// Internal state is inconsistent
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Prompt template rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl NoesisError {
    /// Whether retrying the same oracle request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, NoesisError::OracleTransient(_))
    }
}

impl From<String> for NoesisError {
    fn from(s: String) -> Self {
        NoesisError::Other(s)
    }
}

impl From<&str> for NoesisError {
    fn from(s: &str) -> Self {
        NoesisError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for NoesisError {
    fn from(err: anyhow::Error) -> Self {
        NoesisError::Other(err.to_string())
    }
}

impl From<figment::Error> for NoesisError {
    fn from(err: figment::Error) -> Self {
        NoesisError::Configuration(err.to_string())
    }
}
