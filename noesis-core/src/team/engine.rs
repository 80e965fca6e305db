//! Team execution engine
//!
//! Runs the coordinator's decisions against a fresh blackboard until it
//! terminates or the turn budget is spent. Every decision costs a turn,
//! including invalid ones. Member failures are written to the blackboard as
//! failure entries so the coordinator can route around them; only a broken
//! internal invariant is returned as an error.

use super::blackboard::{Blackboard, EntrySummary};
use super::coordinator::{
    validate_decision, Coordinator, CoordinatorView, DecisionHistory, DelegationDecision,
    HistoryEntry, RosterEntry,
};
use super::participant::Participant;
use crate::error::{NoesisError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Writer recorded for data passed into a run
pub const INITIAL_WRITER: &str = "initial";

/// A participant with a role in a team
#[derive(Clone)]
pub struct TeamMember {
    pub role: String,
    pub description: String,
    pub participant: Arc<dyn Participant>,
}

impl TeamMember {
    pub fn new(
        role: impl Into<String>,
        description: impl Into<String>,
        participant: Arc<dyn Participant>,
    ) -> Self {
        Self {
            role: role.into(),
            description: description.into(),
            participant,
        }
    }
}

impl std::fmt::Debug for TeamMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamMember")
            .field("role", &self.role)
            .field("participant", &self.participant.name())
            .finish()
    }
}

/// How a team run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TeamStatus {
    Completed,
    TurnLimitExceeded,
    /// The coordinator could not produce a decision
    Failed { reason: String },
}

/// Terminal output of a team run plus what the blackboard looked like
#[derive(Debug, Clone, Serialize)]
pub struct TeamOutcome {
    pub team: String,
    pub status: TeamStatus,
    pub output_key: Option<String>,
    pub output: Option<Value>,
    pub turns_used: u32,
    pub history: Vec<HistoryEntry>,
    pub entries: Vec<EntrySummary>,
}

impl TeamOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == TeamStatus::Completed
    }

    /// Output as text; "no result" when the run produced nothing
    pub fn output_text(&self) -> String {
        match &self.output {
            Some(Value::String(s)) => s.clone(),
            Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            None => "no result".to_string(),
        }
    }
}

/// Members plus a coordinator
pub struct Team {
    name: String,
    members: Vec<TeamMember>,
    coordinator: Arc<dyn Coordinator>,
    max_turns: u32,
}

impl Team {
    pub fn new(name: impl Into<String>, coordinator: Arc<dyn Coordinator>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            coordinator,
            max_turns: 10,
        }
    }

    /// Add a member; roles must be unique
    pub fn with_member(mut self, member: TeamMember) -> Result<Self> {
        if self.members.iter().any(|m| m.role == member.role) {
            return Err(NoesisError::Configuration(format!(
                "team '{}' already has a member with role '{}'",
                self.name, member.role
            )));
        }
        self.members.push(member);
        Ok(self)
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[TeamMember] {
        &self.members
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    fn roster(&self) -> Vec<RosterEntry> {
        self.members
            .iter()
            .map(|m| RosterEntry {
                role: m.role.clone(),
                description: m.description.clone(),
            })
            .collect()
    }

    /// Run the team on `task`, seeding the blackboard with `initial_data`
    pub async fn run(&self, task: &str, initial_data: Map<String, Value>) -> Result<TeamOutcome> {
        let span = info_span!("team", team = %self.name);
        self.run_turns(task, initial_data).instrument(span).await
    }

    async fn run_turns(&self, task: &str, initial_data: Map<String, Value>) -> Result<TeamOutcome> {
        info!(members = self.members.len(), max_turns = self.max_turns, "Team run started");

        let mut board = Blackboard::new();
        for (key, value) in initial_data {
            board.write(key, value, INITIAL_WRITER);
        }
        let mut history = DecisionHistory::new();
        let roster = self.roster();

        for turn in 1..=self.max_turns {
            board.set_turn(turn);
            let view = CoordinatorView {
                team: &self.name,
                task,
                roster: &roster,
                blackboard: &board,
                history: &history,
                turn,
                max_turns: self.max_turns,
            };

            let decision = match self.coordinator.decide(&view).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(turn, error = %e, "Coordinator failed; ending team run");
                    history.record(turn, "coordinator", "failed", e.to_string());
                    return Ok(self.outcome(
                        TeamStatus::Failed {
                            reason: e.to_string(),
                        },
                        None,
                        None,
                        turn,
                        history,
                        &board,
                    ));
                }
            };

            if let Err(e) = validate_decision(&decision, &roster, &board) {
                warn!(turn, error = %e, "Coordinator made an invalid decision");
                history.record(turn, "coordinator", "invalid decision", e.to_string());
                continue;
            }

            match decision {
                DelegationDecision::Delegate {
                    member,
                    input_keys,
                    instruction,
                    output_key,
                    reasoning,
                } => {
                    let key = output_key
                        .filter(|k| !k.trim().is_empty())
                        .unwrap_or_else(|| format!("result_{}_turn{}", member, turn));
                    history.record(
                        turn,
                        "coordinator",
                        format!("delegate -> {}", member),
                        if reasoning.is_empty() { instruction.clone() } else { reasoning },
                    );

                    let inputs = board.read_many(&input_keys).map_err(|e| {
                        NoesisError::Invariant(format!("validated input vanished: {}", e))
                    })?;
                    let participant = self
                        .members
                        .iter()
                        .find(|m| m.role == member)
                        .map(|m| Arc::clone(&m.participant))
                        .ok_or_else(|| {
                            NoesisError::Invariant(format!("validated member '{}' vanished", member))
                        })?;

                    debug!(turn, member = %member, key = %key, inputs = input_keys.len(), "Delegating");
                    match participant.process(&instruction, &inputs).await {
                        Ok(value) => {
                            board.write(key.clone(), value, member.clone());
                            let digest = board
                                .entry(&key)
                                .map(|e| e.digest.clone())
                                .unwrap_or_default();
                            history.record(turn, member, format!("done -> {}", key), digest);
                        }
                        Err(e) => {
                            warn!(turn, member = %member, error = %e, "Team member failed");
                            board.write_failure(key.clone(), member.clone(), e.to_string());
                            history.record(turn, member, format!("failed -> {}", key), e.to_string());
                        }
                    }
                }
                DelegationDecision::Terminate {
                    output_key,
                    reasoning,
                } => {
                    history.record(turn, "coordinator", "terminate", reasoning);
                    let (key, output) = match output_key {
                        Some(key) => {
                            let value = board.read(&key).map_err(|e| {
                                NoesisError::Invariant(format!("validated output vanished: {}", e))
                            })?;
                            (Some(key.clone()), Some(value.clone()))
                        }
                        None => last_valid(&board),
                    };
                    info!(turn, output_key = ?key, "Team run completed");
                    return Ok(self.outcome(
                        TeamStatus::Completed,
                        key,
                        output,
                        turn,
                        history,
                        &board,
                    ));
                }
            }
        }

        warn!(max_turns = self.max_turns, "Team run hit its turn limit");
        let (key, output) = last_valid(&board);
        Ok(self.outcome(
            TeamStatus::TurnLimitExceeded,
            key,
            output,
            self.max_turns,
            history,
            &board,
        ))
    }

    fn outcome(
        &self,
        status: TeamStatus,
        output_key: Option<String>,
        output: Option<Value>,
        turns_used: u32,
        history: DecisionHistory,
        board: &Blackboard,
    ) -> TeamOutcome {
        TeamOutcome {
            team: self.name.clone(),
            status,
            output_key,
            output,
            turns_used,
            history: history.into_entries(),
            entries: board.summary(),
        }
    }
}

fn last_valid(board: &Blackboard) -> (Option<String>, Option<Value>) {
    match board.last_valid_entry() {
        Some(entry) => (Some(entry.key.clone()), Some(entry.value.clone())),
        None => (None, None),
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("name", &self.name)
            .field("members", &self.members)
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMProvider, ScriptedOracle, ScriptedReply};
    use crate::team::{OracleParticipant, ScriptedCoordinator};
    use async_trait::async_trait;
    use serde_json::json;

    struct Failing;

    #[async_trait]
    impl Participant for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn instructions(&self) -> &str {
            ""
        }

        fn oracle(&self) -> Arc<dyn LLMProvider> {
            Arc::new(ScriptedOracle::new(Vec::new()))
        }

        async fn process(&self, _instruction: &str, _inputs: &Map<String, Value>) -> Result<Value> {
            Err(NoesisError::Other("disk on fire".into()))
        }
    }

    fn member(role: &str, reply: &str) -> TeamMember {
        let oracle = Arc::new(ScriptedOracle::repeating(ScriptedReply::text(reply)));
        TeamMember::new(role, format!("The {role}"), Arc::new(OracleParticipant::new(role, "", oracle)))
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let coordinator = Arc::new(ScriptedCoordinator::new(Vec::new()));
        let result = Team::new("t", coordinator)
            .with_member(member("reader", "x"))
            .unwrap()
            .with_member(member("reader", "y"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failure_entry_then_fallback_output() {
        let coordinator = Arc::new(ScriptedCoordinator::new(vec![
            DelegationDecision::delegate("reader", "read").with_output("notes"),
            DelegationDecision::delegate("broken", "explode"),
            DelegationDecision::terminate(None),
        ]));
        let team = Team::new("t", coordinator)
            .with_member(member("reader", "some notes"))
            .unwrap()
            .with_member(TeamMember::new("broken", "", Arc::new(Failing)))
            .unwrap();

        let outcome = team.run("task", Map::new()).await.unwrap();
        assert_eq!(outcome.status, TeamStatus::Completed);
        assert_eq!(outcome.turns_used, 3);
        assert_eq!(outcome.output_key.as_deref(), Some("notes"));
        assert_eq!(outcome.output, Some(json!("some notes")));
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.entries[1].key, "result_broken_turn2");
        assert!(outcome.entries[1].digest.starts_with("FAILED: "));
    }

    #[tokio::test]
    async fn test_coordinator_failure_is_status() {
        let coordinator = Arc::new(ScriptedCoordinator::new(Vec::new()));
        let team = Team::new("t", coordinator)
            .with_member(member("reader", "x"))
            .unwrap();

        let outcome = team.run("task", Map::new()).await.unwrap();
        assert!(matches!(outcome.status, TeamStatus::Failed { .. }));
        assert_eq!(outcome.turns_used, 1);
        assert_eq!(outcome.output_text(), "no result");
    }

    #[tokio::test]
    async fn test_initial_data_written_by_initial() {
        let coordinator = Arc::new(ScriptedCoordinator::new(vec![DelegationDecision::terminate(
            Some("paper"),
        )]));
        let team = Team::new("t", coordinator)
            .with_member(member("reader", "x"))
            .unwrap();

        let mut data = Map::new();
        data.insert("paper".into(), json!({"title": "Attention"}));
        let outcome = team.run("task", data).await.unwrap();

        assert_eq!(outcome.entries[0].writer, INITIAL_WRITER);
        assert_eq!(outcome.output, Some(json!({"title": "Attention"})));
        assert_eq!(outcome.output_text(), "{\n  \"title\": \"Attention\"\n}");
    }
}
