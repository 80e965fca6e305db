//! Team participants
//!
//! A participant is anything that can take an instruction plus a bag of
//! blackboard inputs and produce a value. The default behaviour is a single
//! oracle call; [`RoleScoped`](super::RoleScoped) layers recursion on top.

use super::blackboard::truncate_chars;
use crate::error::Result;
use crate::llm::{LLMConfig, LLMProvider, LLMRequest};
use crate::parsing::JsonParser;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Longest rendering of the input data placed in a participant prompt
const INPUT_CHARS: usize = 3_000;

#[async_trait]
pub trait Participant: Send + Sync {
    /// Unique name in the participant catalog
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// System instructions for this participant's oracle calls
    fn instructions(&self) -> &str;

    fn oracle(&self) -> Arc<dyn LLMProvider>;

    fn llm_config(&self) -> LLMConfig {
        LLMConfig::default()
    }

    /// Produce a result for `instruction` given the selected inputs
    async fn process(&self, instruction: &str, inputs: &Map<String, Value>) -> Result<Value> {
        ask_once(self, instruction, inputs).await
    }
}

/// One tool-less oracle call with the participant's instructions
pub async fn ask_once<P: Participant + ?Sized>(
    participant: &P,
    instruction: &str,
    inputs: &Map<String, Value>,
) -> Result<Value> {
    let request = LLMRequest::with_system_prompt(
        participant.instructions(),
        render_task(instruction, inputs),
    )
    .with_config(&participant.llm_config());

    let response = participant.oracle().generate_request(&request).await?;
    Ok(parse_answer(&response.content))
}

/// Instruction followed by the input data, bounded in size
pub fn render_task(instruction: &str, inputs: &Map<String, Value>) -> String {
    if inputs.is_empty() {
        return instruction.to_string();
    }
    let data = serde_json::to_string_pretty(inputs).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{}\n\n## Available data\n{}",
        instruction,
        truncate_chars(&data, INPUT_CHARS)
    )
}

/// JSON when the answer looks like JSON, otherwise the text itself
pub fn parse_answer(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with("```") {
        if let Ok(value) = JsonParser::lenient().parse(trimmed) {
            return value;
        }
    }
    Value::String(trimmed.to_string())
}

/// Participant backed directly by an oracle
pub struct OracleParticipant {
    name: String,
    description: String,
    instructions: String,
    oracle: Arc<dyn LLMProvider>,
    config: LLMConfig,
}

impl OracleParticipant {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        oracle: Arc<dyn LLMProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instructions: instructions.into(),
            oracle,
            config: LLMConfig::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_config(mut self, config: LLMConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl Participant for OracleParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn oracle(&self) -> Arc<dyn LLMProvider> {
        Arc::clone(&self.oracle)
    }

    fn llm_config(&self) -> LLMConfig {
        self.config.clone()
    }
}

impl std::fmt::Debug for OracleParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleParticipant")
            .field("name", &self.name)
            .field("model", &self.oracle.model_info().model_name)
            .finish()
    }
}
