//! JSON extraction from oracle text
//!
//! Oracles asked for structured output without a native forced-choice
//! mechanism tend to wrap JSON in prose or code fences. [`JsonParser`] pulls
//! the first JSON object or array out of such text.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

/// Error type for parsing operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Empty input
    #[error("Empty input")]
    EmptyInput,

    /// No JSON found, or the JSON found is invalid
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// JSON parser with optional light repair
#[derive(Debug, Clone, Copy)]
pub struct JsonParser {
    repair: bool,
}

impl JsonParser {
    /// Parser that also removes trailing commas
    pub fn lenient() -> Self {
        Self { repair: true }
    }

    /// Parser that only strips fences and surrounding prose
    pub fn strict() -> Self {
        Self { repair: false }
    }

    pub fn parse(&self, raw: &str) -> ParseResult<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let unfenced = strip_code_fences(trimmed);
        if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
            return Ok(value);
        }

        let candidate = extract_balanced(unfenced).ok_or_else(|| {
            ParseError::InvalidFormat("no JSON object or array found".to_string())
        })?;

        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => Ok(value),
            Err(_) if self.repair => {
                static TRAILING_COMMA_RE: LazyLock<Regex> =
                    LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());
                let repaired = TRAILING_COMMA_RE.replace_all(candidate, "$1");
                serde_json::from_str(&repaired)
                    .map_err(|e| ParseError::InvalidFormat(e.to_string()))
            }
            Err(e) => Err(ParseError::InvalidFormat(e.to_string())),
        }
    }
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::lenient()
    }
}

fn strip_code_fences(input: &str) -> &str {
    static CODE_FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").unwrap());

    CODE_FENCE_RE
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(input)
}

/// First balanced `{...}` or `[...]` span, honouring string literals
fn extract_balanced(input: &str) -> Option<&str> {
    let start = input.find(['{', '['])?;
    let substring = &input[start..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in substring.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&substring[..=i]);
                }
            }
            _ => {}
        }
    }

    None
}
