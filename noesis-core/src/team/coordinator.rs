//! Team coordinator
//!
//! Each turn the coordinator looks at the task, the roster, the blackboard
//! summary and the decision history, and either delegates one step to a
//! member or terminates. Decisions are validated before the engine acts on
//! them; an invalid one is recorded and costs a turn.

use super::blackboard::{truncate_chars, Blackboard};
use crate::decision::DecisionCaller;
use crate::error::{NoesisError, Result};
use crate::llm::{LLMProvider, LLMRequest, RetryConfig};
use crate::prompts::{COORDINATOR_DECISION, COORDINATOR_SYSTEM};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// History entries shown to the coordinator
const HISTORY_WINDOW: usize = 20;

/// What the coordinator wants to happen next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DelegationDecision {
    Delegate {
        member: String,
        #[serde(default)]
        input_keys: Vec<String>,
        #[serde(default)]
        instruction: String,
        /// Defaults to `result_{member}_turn{n}`
        #[serde(default)]
        output_key: Option<String>,
        #[serde(default)]
        reasoning: String,
    },
    Terminate {
        /// Key holding the final answer; the last valid entry when absent
        #[serde(default)]
        output_key: Option<String>,
        #[serde(default)]
        reasoning: String,
    },
}

impl DelegationDecision {
    pub fn delegate(member: impl Into<String>, instruction: impl Into<String>) -> Self {
        DelegationDecision::Delegate {
            member: member.into(),
            input_keys: Vec::new(),
            instruction: instruction.into(),
            output_key: None,
            reasoning: String::new(),
        }
    }

    pub fn terminate(output_key: Option<&str>) -> Self {
        DelegationDecision::Terminate {
            output_key: output_key.map(str::to_string),
            reasoning: String::new(),
        }
    }

    /// Set input keys on a delegation
    pub fn with_inputs(mut self, keys: &[&str]) -> Self {
        if let DelegationDecision::Delegate { input_keys, .. } = &mut self {
            *input_keys = keys.iter().map(|k| k.to_string()).collect();
        }
        self
    }

    /// Set the output key on a delegation
    pub fn with_output(mut self, key: &str) -> Self {
        if let DelegationDecision::Delegate { output_key, .. } = &mut self {
            *output_key = Some(key.to_string());
        }
        self
    }

    pub fn reasoning(&self) -> &str {
        match self {
            DelegationDecision::Delegate { reasoning, .. }
            | DelegationDecision::Terminate { reasoning, .. } => reasoning,
        }
    }
}

/// JSON Schema the oracle must answer with
pub fn delegation_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": ["delegate", "terminate"],
                "description": "delegate a step to a member, or terminate with the result"
            },
            "member": {
                "type": "string",
                "description": "Role name of the member to delegate to"
            },
            "input_keys": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Blackboard keys the member should receive"
            },
            "instruction": {
                "type": "string",
                "description": "What the member should do"
            },
            "output_key": {
                "type": "string",
                "description": "Blackboard key for the member's result, or the final result on terminate"
            },
            "reasoning": {
                "type": "string",
                "description": "Why this is the right next step"
            }
        },
        "required": ["action", "reasoning"]
    })
}

/// One line of decision history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub turn: u32,
    /// "coordinator" or the member role
    pub actor: String,
    pub action: String,
    pub detail: String,
}

/// Ordered record of what happened in a team run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionHistory {
    entries: Vec<HistoryEntry>,
}

impl DecisionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        turn: u32,
        actor: impl Into<String>,
        action: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.entries.push(HistoryEntry {
            turn,
            actor: actor.into(),
            action: action.into(),
            detail: detail.into(),
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recent history as prompt text
    pub fn condensed(&self) -> String {
        if self.entries.is_empty() {
            return "(no history)".to_string();
        }
        let skip = self.entries.len().saturating_sub(HISTORY_WINDOW);
        self.entries[skip..]
            .iter()
            .map(|h| {
                let mut line = format!("Turn {}: [{}] {}", h.turn, h.actor, h.action);
                if !h.detail.is_empty() {
                    line.push_str(": ");
                    line.push_str(&truncate_chars(&h.detail, 80));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A roster line: role and one-line description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub role: String,
    pub description: String,
}

/// Everything the coordinator may look at
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorView<'a> {
    pub team: &'a str,
    pub task: &'a str,
    pub roster: &'a [RosterEntry],
    pub blackboard: &'a Blackboard,
    pub history: &'a DecisionHistory,
    pub turn: u32,
    pub max_turns: u32,
}

impl CoordinatorView<'_> {
    fn render_roster(&self) -> String {
        self.roster
            .iter()
            .map(|m| {
                let description = if m.description.is_empty() {
                    "(no description)"
                } else {
                    m.description.as_str()
                };
                format!("- **{}**: {}", m.role, description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Decides the next step of a team run
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn decide(&self, view: &CoordinatorView<'_>) -> Result<DelegationDecision>;
}

/// Check a decision against the roster and the blackboard
pub fn validate_decision(
    decision: &DelegationDecision,
    roster: &[RosterEntry],
    blackboard: &Blackboard,
) -> Result<()> {
    match decision {
        DelegationDecision::Delegate {
            member, input_keys, ..
        } => {
            if !roster.iter().any(|m| &m.role == member) {
                return Err(NoesisError::InvalidDelegation(format!(
                    "unknown member '{}'",
                    member
                )));
            }
            if let Some(missing) = input_keys.iter().find(|k| !blackboard.contains(k)) {
                return Err(NoesisError::InvalidDelegation(format!(
                    "input key '{}' is not on the blackboard",
                    missing
                )));
            }
            Ok(())
        }
        DelegationDecision::Terminate {
            output_key: Some(key),
            ..
        } if !blackboard.contains(key) => Err(NoesisError::InvalidDelegation(format!(
            "output key '{}' is not on the blackboard",
            key
        ))),
        DelegationDecision::Terminate { .. } => Ok(()),
    }
}

/// Coordinator backed by structured oracle decisions
pub struct OracleCoordinator {
    caller: DecisionCaller,
    temperature: f32,
    max_retries: u32,
}

impl OracleCoordinator {
    pub fn new(oracle: Arc<dyn LLMProvider>) -> Self {
        Self {
            caller: DecisionCaller::new(oracle),
            temperature: 0.3,
            max_retries: 2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.caller = self.caller.with_retry(retry);
        self
    }

    fn build_request(&self, view: &CoordinatorView<'_>) -> Result<LLMRequest> {
        let system = COORDINATOR_SYSTEM.render(&crate::prompt_vars! { "team" => view.team })?;
        let prompt = COORDINATOR_DECISION.render(&crate::prompt_vars! {
            "task" => view.task,
            "roster" => view.render_roster(),
            "blackboard" => view.blackboard.render_summary(),
            "history" => view.history.condensed(),
            "turn" => view.turn,
            "max_turns" => view.max_turns,
        })?;
        Ok(LLMRequest::with_system_prompt(system, prompt).with_temperature(self.temperature))
    }
}

#[async_trait]
impl Coordinator for OracleCoordinator {
    async fn decide(&self, view: &CoordinatorView<'_>) -> Result<DelegationDecision> {
        let request = self.build_request(view)?;
        self.caller
            .decide_as::<DelegationDecision>(&request, &delegation_schema(), self.max_retries)
            .await
    }
}

/// Coordinator that replays fixed decisions
pub struct ScriptedCoordinator {
    decisions: Mutex<VecDeque<DelegationDecision>>,
    repeat_last: Option<DelegationDecision>,
    turns_seen: Mutex<Vec<u32>>,
}

impl ScriptedCoordinator {
    pub fn new(decisions: Vec<DelegationDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            repeat_last: None,
            turns_seen: Mutex::new(Vec::new()),
        }
    }

    /// Answer `decision` on every turn
    pub fn repeating(decision: DelegationDecision) -> Self {
        Self {
            repeat_last: Some(decision),
            ..Self::new(Vec::new())
        }
    }

    /// Turn numbers the coordinator was asked about
    pub fn turns_seen(&self) -> Vec<u32> {
        self.turns_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Coordinator for ScriptedCoordinator {
    async fn decide(&self, view: &CoordinatorView<'_>) -> Result<DelegationDecision> {
        self.turns_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(view.turn);

        let next = self
            .decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.or_else(|| self.repeat_last.clone()).ok_or_else(|| {
            NoesisError::DecisionFormat {
                attempts: 1,
                reason: "scripted coordinator has no more decisions".to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedOracle, ScriptedReply};
    use serde_json::json;

    fn roster() -> Vec<RosterEntry> {
        vec![
            RosterEntry {
                role: "reader".into(),
                description: "Reads papers".into(),
            },
            RosterEntry {
                role: "critic".into(),
                description: String::new(),
            },
        ]
    }

    #[test]
    fn test_decision_deserializes_from_oracle_shape() {
        let decision: DelegationDecision = serde_json::from_value(json!({
            "action": "delegate",
            "member": "reader",
            "input_keys": ["paper"],
            "instruction": "summarize",
            "reasoning": "need a summary"
        }))
        .unwrap();

        assert_eq!(
            decision,
            DelegationDecision::Delegate {
                member: "reader".into(),
                input_keys: vec!["paper".into()],
                instruction: "summarize".into(),
                output_key: None,
                reasoning: "need a summary".into(),
            }
        );

        let terminate: DelegationDecision =
            serde_json::from_value(json!({"action": "terminate", "reasoning": "done"})).unwrap();
        assert_eq!(terminate.reasoning(), "done");
    }

    #[test]
    fn test_validate_decision() {
        let mut board = Blackboard::new();
        board.write("paper", json!("text"), "initial");

        let ok = DelegationDecision::delegate("reader", "go").with_inputs(&["paper"]);
        assert!(validate_decision(&ok, &roster(), &board).is_ok());

        let unknown = DelegationDecision::delegate("ghost", "go");
        assert!(matches!(
            validate_decision(&unknown, &roster(), &board),
            Err(NoesisError::InvalidDelegation(msg)) if msg.contains("ghost")
        ));

        let missing_key = DelegationDecision::delegate("reader", "go").with_inputs(&["nope"]);
        assert!(validate_decision(&missing_key, &roster(), &board).is_err());

        assert!(validate_decision(&DelegationDecision::terminate(None), &roster(), &board).is_ok());
        assert!(
            validate_decision(&DelegationDecision::terminate(Some("nope")), &roster(), &board)
                .is_err()
        );
    }

    #[test]
    fn test_condensed_history_window() {
        let mut history = DecisionHistory::new();
        assert_eq!(history.condensed(), "(no history)");
        for turn in 1..=25 {
            history.record(turn, "coordinator", "delegate -> reader", "");
        }
        let text = history.condensed();
        assert_eq!(text.lines().count(), HISTORY_WINDOW);
        assert!(text.starts_with("Turn 6:"));
    }

    #[tokio::test]
    async fn test_oracle_coordinator_prompt_and_decision() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedReply::structured(json!({
            "action": "terminate",
            "output_key": "summary",
            "reasoning": "have it"
        }))]));
        let coordinator = OracleCoordinator::new(oracle.clone());

        let mut board = Blackboard::new();
        board.write("summary", json!("short"), "reader");
        let history = DecisionHistory::new();
        let roster = roster();
        let view = CoordinatorView {
            team: "review",
            task: "Summarize the paper",
            roster: &roster,
            blackboard: &board,
            history: &history,
            turn: 2,
            max_turns: 10,
        };

        let decision = coordinator.decide(&view).await.unwrap();
        assert_eq!(decision, DelegationDecision::Terminate {
            output_key: Some("summary".into()),
            reasoning: "have it".into(),
        });

        let request = &oracle.requests()[0];
        assert_eq!(request.temperature, Some(0.3));
        assert!(request.system_prompt().unwrap().contains("\"review\""));
        let prompt = &request.messages[1].content;
        assert!(prompt.contains("- **critic**: (no description)"));
        assert!(prompt.contains("- **summary** (written by reader in turn 0): short"));
        assert!(prompt.contains("turn 2 of 10"));
    }

    #[tokio::test]
    async fn test_scripted_coordinator_exhausts() {
        let coordinator = ScriptedCoordinator::new(vec![DelegationDecision::terminate(None)]);
        let board = Blackboard::new();
        let history = DecisionHistory::new();
        let view = CoordinatorView {
            team: "t",
            task: "x",
            roster: &[],
            blackboard: &board,
            history: &history,
            turn: 1,
            max_turns: 3,
        };

        assert!(coordinator.decide(&view).await.is_ok());
        assert!(coordinator.decide(&view).await.is_err());
        assert_eq!(coordinator.turns_seen(), vec![1, 1]);
    }
}
