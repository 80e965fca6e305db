//! Shared blackboard for one team run
//!
//! Members exchange intermediate results by key. The coordinator only ever
//! sees [`EntrySummary`] values, whose digests are bounded no matter how
//! large the underlying value is.

use crate::error::{NoesisError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Longest digest shown for a value
pub const DIGEST_CHARS: usize = 120;

/// Number of object keys listed in a digest
const DIGEST_KEYS: usize = 5;

/// A value on the blackboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackboardEntry {
    pub key: String,
    pub value: Value,
    pub writer: String,
    /// Monotonic per blackboard; an overwrite gets a new one
    pub sequence: u64,
    /// Coordinator turn of the write (0 for initial data)
    pub turn: u32,
    pub written_at: DateTime<Utc>,
    pub digest: String,
    /// Written in place of a result after a member failed
    pub is_failure: bool,
}

/// What the coordinator sees of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub key: String,
    pub writer: String,
    pub digest: String,
}

/// Key-value store scoped to one team run
#[derive(Debug, Clone, Default)]
pub struct Blackboard {
    entries: HashMap<String, BlackboardEntry>,
    next_sequence: u64,
    turn: u32,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn recorded on subsequent writes
    pub fn set_turn(&mut self, turn: u32) {
        self.turn = turn;
    }

    /// Store `value` under `key`, replacing any previous entry
    pub fn write(&mut self, key: impl Into<String>, value: Value, writer: impl Into<String>) {
        self.insert(key.into(), value, writer.into(), false);
    }

    /// Record that `writer` failed to produce `key`
    pub fn write_failure(
        &mut self,
        key: impl Into<String>,
        writer: impl Into<String>,
        message: impl Into<String>,
    ) {
        let value = serde_json::json!({ "error": message.into() });
        self.insert(key.into(), value, writer.into(), true);
    }

    fn insert(&mut self, key: String, value: Value, writer: String, is_failure: bool) {
        self.next_sequence += 1;
        let digest = if is_failure {
            let message = value["error"].as_str().unwrap_or_default();
            truncate_chars(&format!("FAILED: {}", message), DIGEST_CHARS)
        } else {
            digest(&value)
        };
        let entry = BlackboardEntry {
            key: key.clone(),
            value,
            writer,
            sequence: self.next_sequence,
            turn: self.turn,
            written_at: Utc::now(),
            digest,
            is_failure,
        };
        self.entries.insert(key, entry);
    }

    pub fn read(&self, key: &str) -> Result<&Value> {
        self.entries
            .get(key)
            .map(|e| &e.value)
            .ok_or_else(|| NoesisError::KeyNotFound(key.to_string()))
    }

    /// Values for several keys, failing on the first missing one
    pub fn read_many(&self, keys: &[String]) -> Result<Map<String, Value>> {
        keys.iter()
            .map(|k| self.read(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn entry(&self, key: &str) -> Option<&BlackboardEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in write order
    pub fn keys(&self) -> Vec<&str> {
        self.entries_in_order().into_iter().map(|e| e.key.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entries_in_order(&self) -> Vec<&BlackboardEntry> {
        let mut entries: Vec<&BlackboardEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }

    /// `{key, writer, digest}` for every entry, in write order
    pub fn summary(&self) -> Vec<EntrySummary> {
        self.entries_in_order()
            .into_iter()
            .map(|e| EntrySummary {
                key: e.key.clone(),
                writer: e.writer.clone(),
                digest: e.digest.clone(),
            })
            .collect()
    }

    /// Summary as prompt text
    pub fn render_summary(&self) -> String {
        if self.entries.is_empty() {
            return "(blackboard is empty)".to_string();
        }
        self.entries_in_order()
            .into_iter()
            .map(|e| {
                format!(
                    "- **{}** (written by {} in turn {}): {}",
                    e.key, e.writer, e.turn, e.digest
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Most recent entry that is not a failure record
    pub fn last_valid_entry(&self) -> Option<&BlackboardEntry> {
        self.entries
            .values()
            .filter(|e| !e.is_failure)
            .max_by_key(|e| e.sequence)
    }
}

/// Bounded one-line description of a value
pub fn digest(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(DIGEST_KEYS).map(String::as_str).collect();
            let more = if map.len() > DIGEST_KEYS { ", ..." } else { "" };
            format!("object with keys: [{}{}]", keys.join(", "), more)
        }
        Value::Array(items) => format!("array with {} items", items.len()),
        other => other.to_string(),
    };
    truncate_chars(&raw, DIGEST_CHARS)
}

/// First `max` characters of `s`, with "..." appended when cut
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_write_and_read() {
        let mut board = Blackboard::new();
        board.write("paper", json!({"title": "T"}), "initial");
        assert_eq!(board.read("paper").unwrap()["title"], "T");
        assert!(matches!(board.read("nope"), Err(NoesisError::KeyNotFound(k)) if k == "nope"));
    }

    #[test]
    fn test_overwrite_records_new_writer() {
        let mut board = Blackboard::new();
        board.write("draft", json!("v1"), "writer");
        board.set_turn(2);
        board.write("draft", json!("v2"), "critic");

        let entry = board.entry("draft").unwrap();
        assert_eq!(entry.value, json!("v2"));
        assert_eq!(entry.writer, "critic");
        assert_eq!(entry.sequence, 2);
        assert_eq!(entry.turn, 2);
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn test_digests() {
        assert_eq!(digest(&json!([1, 2, 3])), "array with 3 items");
        assert_eq!(
            digest(&json!({"a": 1, "b": 2, "c": 3, "d": 4, "e": 5, "f": 6})),
            "object with keys: [a, b, c, d, e, ...]"
        );
        assert_eq!(digest(&json!(42)), "42");

        let long = "x".repeat(500);
        let d = digest(&Value::String(long));
        assert_eq!(d.chars().count(), DIGEST_CHARS + 3);
        assert!(d.ends_with("..."));
    }

    #[test]
    fn test_summary_and_last_valid() {
        let mut board = Blackboard::new();
        assert_eq!(board.render_summary(), "(blackboard is empty)");

        board.write("a", json!("first"), "initial");
        board.set_turn(1);
        board.write("b", json!("second"), "reader");
        board.write_failure("c", "critic", "timeout");

        let summary = board.summary();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[2].digest, "FAILED: timeout");
        assert_eq!(board.keys(), vec!["a", "b", "c"]);
        assert_eq!(board.last_valid_entry().unwrap().key, "b");
        assert!(board.render_summary().contains("- **b** (written by reader in turn 1): second"));
    }

    #[test]
    fn test_read_many() {
        let mut board = Blackboard::new();
        board.write("a", json!(1), "w");
        board.write("b", json!(2), "w");

        let values = board.read_many(&["a".into(), "b".into()]).unwrap();
        assert_eq!(values.len(), 2);
        assert!(board.read_many(&["a".into(), "z".into()]).is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    proptest! {
        #[test]
        fn summary_size_independent_of_value_size(len in 0usize..4_000, keys in 0usize..40) {
            let mut board = Blackboard::new();
            board.write("text", Value::String("y".repeat(len)), "w");
            let object: Map<String, Value> = (0..keys)
                .map(|i| (format!("key_{i}"), Value::String("z".repeat(len))))
                .collect();
            board.write("object", Value::Object(object), "w");
            board.write("list", Value::Array(vec![json!(1); keys]), "w");

            for entry in board.summary() {
                prop_assert!(entry.digest.chars().count() <= DIGEST_CHARS + 3);
            }
        }
    }
}
