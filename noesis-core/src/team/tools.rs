//! Team tools offered to the oracle
//!
//! `run_team` runs a declared team, `run_ad_hoc_team` assembles one from
//! catalog participants, and `list_teams` shows what is available. Members
//! of a team started by a tool run at the calling context's depth.

use super::environment::TeamEnvironment;
use crate::error::Result;
use crate::registry::{fields_to_schema, FieldKind, InputField};
use crate::tools::{
    HandlerTool, Tool, ToolError, ToolExecutionContext, ToolHandler, ToolMetadata, ToolSchema,
    Toolbox,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

pub const RUN_TEAM: &str = "run_team";
pub const RUN_AD_HOC_TEAM: &str = "run_ad_hoc_team";
pub const LIST_TEAMS: &str = "list_teams";

/// The three team tools bound to `env`
pub fn team_tools(env: &Arc<TeamEnvironment>) -> Vec<Arc<dyn Tool>> {
    let run_team: Arc<dyn Tool> = Arc::new(HandlerTool::new(
        ToolMetadata::new(
            RUN_TEAM,
            "Run a predefined team. Its members collaborate on the task through a shared \
             blackboard while a coordinator decides each step.",
        ),
        ToolSchema::new(fields_to_schema(&[
            InputField::new("team_name", FieldKind::String, "Team name, see list_teams"),
            InputField::new("task", FieldKind::String, "What the team should accomplish"),
            InputField::new("initial_data", FieldKind::Object, "Data written to the blackboard before the first turn").optional(),
            InputField::new("max_turns", FieldKind::Integer, "Override the team's turn budget").optional(),
        ])),
        RunTeam {
            env: Arc::clone(env),
        },
    ));
    let run_ad_hoc_team: Arc<dyn Tool> = Arc::new(HandlerTool::new(
        ToolMetadata::new(
            RUN_AD_HOC_TEAM,
            "Assemble a one-off team from at least two participants and run it on the task.",
        ),
        ToolSchema::new(fields_to_schema(&[
            InputField::new("participants", FieldKind::Array, "Participant names, at least 2"),
            InputField::new("task", FieldKind::String, "What the team should accomplish"),
            InputField::new("initial_data", FieldKind::Object, "Data written to the blackboard before the first turn").optional(),
            InputField::new("max_turns", FieldKind::Integer, "Turn budget").optional(),
        ])),
        RunAdHocTeam {
            env: Arc::clone(env),
        },
    ));
    let list_teams: Arc<dyn Tool> = Arc::new(HandlerTool::new(
        ToolMetadata::new(
            LIST_TEAMS,
            "List predefined teams and the participants available for ad-hoc teams.",
        ),
        ToolSchema::empty(),
        ListTeams {
            env: Arc::clone(env),
        },
    ));
    vec![run_team, run_ad_hoc_team, list_teams]
}

/// Team tools collected into a toolbox
pub fn team_toolbox(env: &Arc<TeamEnvironment>) -> Result<Toolbox> {
    let mut toolbox = Toolbox::new();
    for tool in team_tools(env) {
        toolbox.register(tool)?;
    }
    Ok(toolbox)
}

fn required_str<'a>(args: &'a Value, field: &str) -> std::result::Result<&'a str, ToolError> {
    args[field]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::validation(format!("missing required argument '{}'", field)))
}

fn max_turns(args: &Value) -> std::result::Result<Option<u32>, ToolError> {
    match &args["max_turns"] {
        Value::Null => Ok(None),
        value => value
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| ToolError::validation("'max_turns' must be a positive integer")),
    }
}

fn initial_data(args: &Value) -> std::result::Result<Map<String, Value>, ToolError> {
    match &args["initial_data"] {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        _ => Err(ToolError::validation("'initial_data' must be an object")),
    }
}

fn outcome_value(outcome: &super::TeamOutcome) -> std::result::Result<Value, ToolError> {
    serde_json::to_value(outcome).map_err(|e| ToolError::internal(e.to_string()))
}

struct RunTeam {
    env: Arc<TeamEnvironment>,
}

#[async_trait]
impl ToolHandler for RunTeam {
    async fn handle(
        &self,
        args: Value,
        ctx: &ToolExecutionContext,
    ) -> std::result::Result<Value, ToolError> {
        let team_name = required_str(&args, "team_name")?;
        let task = required_str(&args, "task")?;
        let data = initial_data(&args)?;

        let definition = self.env.registry().team(team_name)?;
        let team = self.env.build_team(definition, ctx.depth, max_turns(&args)?)?;

        info!(team = team_name, depth = ctx.depth, "Running team");
        let outcome = team.run(task, data).await?;
        outcome_value(&outcome)
    }
}

struct RunAdHocTeam {
    env: Arc<TeamEnvironment>,
}

#[async_trait]
impl ToolHandler for RunAdHocTeam {
    async fn handle(
        &self,
        args: Value,
        ctx: &ToolExecutionContext,
    ) -> std::result::Result<Value, ToolError> {
        let names: Vec<String> = args["participants"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if names.len() < 2 {
            return Err(ToolError::validation(
                "'participants' must name at least 2 participants",
            ));
        }
        let task = required_str(&args, "task")?;
        let data = initial_data(&args)?;

        let team = self.env.build_ad_hoc_team(&names, ctx.depth, max_turns(&args)?)?;

        info!(team = team.name(), depth = ctx.depth, "Running ad-hoc team");
        let outcome = team.run(task, data).await?;
        outcome_value(&outcome)
    }
}

struct ListTeams {
    env: Arc<TeamEnvironment>,
}

#[async_trait]
impl ToolHandler for ListTeams {
    async fn handle(
        &self,
        _args: Value,
        _ctx: &ToolExecutionContext,
    ) -> std::result::Result<Value, ToolError> {
        let teams: Vec<Value> = self
            .env
            .registry()
            .teams()
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "display_name": t.display_name,
                    "description": t.description,
                    "members": t.members.iter().map(|m| json!({
                        "role": m.role,
                        "participant": m.participant,
                        "description": m.description,
                    })).collect::<Vec<_>>(),
                    "default_max_turns": t.default_max_turns,
                    "tags": t.tags,
                })
            })
            .collect();

        let participants: Vec<Value> = self
            .env
            .participants()
            .exported()
            .into_iter()
            .map(|(name, export)| {
                json!({
                    "name": name,
                    "role": export.default_role,
                    "description": export.description,
                })
            })
            .collect();

        Ok(json!({
            "teams": teams,
            "participants": participants,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedOracle, ScriptedReply, ToolCall};
    use crate::registry::{
        CapabilityRegistry, ParticipantCatalog, TeamDefinition, TeamExport, TeamMemberSpec,
    };
    use crate::runner::ToolDispatcher;
    use crate::team::{DelegationDecision, OracleParticipant, ScriptedCoordinator};
    use crate::tools::ToolErrorKind;

    fn env(decisions: Vec<DelegationDecision>) -> Arc<TeamEnvironment> {
        let oracle = Arc::new(ScriptedOracle::repeating(ScriptedReply::text("findings")));

        let mut catalog = ParticipantCatalog::new();
        catalog
            .register_exported(
                Arc::new(OracleParticipant::new("extractor", "Extract.", oracle.clone())),
                TeamExport {
                    default_role: "analyst".into(),
                    description: "Extracts claims".into(),
                },
            )
            .unwrap();
        catalog
            .register(Arc::new(OracleParticipant::new("critic", "Critique.", oracle.clone())))
            .unwrap();

        let mut registry = CapabilityRegistry::new();
        registry
            .register_team(
                TeamDefinition::new("review", "Reviews a paper")
                    .with_member(TeamMemberSpec::new("analyst", "extractor"))
                    .with_member(TeamMemberSpec::new("critic", "critic"))
                    .with_max_depth(0),
            )
            .unwrap();

        Arc::new(
            TeamEnvironment::new(
                oracle,
                Arc::new(Toolbox::new()),
                Arc::new(registry),
                Arc::new(catalog),
            )
            .with_coordinator(Arc::new(ScriptedCoordinator::new(decisions))),
        )
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new("toolu_1", name, args)
    }

    #[tokio::test]
    async fn test_run_team_returns_outcome() {
        let env = env(vec![
            DelegationDecision::delegate("analyst", "extract").with_output("claims"),
            DelegationDecision::terminate(Some("claims")),
        ]);
        let toolbox = team_toolbox(&env).unwrap();

        let value = toolbox
            .dispatch(
                &call(RUN_TEAM, json!({"team_name": "review", "task": "Review it"})),
                &ToolExecutionContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(value["team"], "review");
        assert_eq!(value["status"]["state"], "completed");
        assert_eq!(value["output"], "findings");
        assert_eq!(value["turns_used"], 2);
    }

    #[tokio::test]
    async fn test_run_team_argument_errors() {
        let toolbox = team_toolbox(&env(Vec::new())).unwrap();
        let ctx = ToolExecutionContext::new();

        let missing = toolbox
            .dispatch(&call(RUN_TEAM, json!({"task": "x"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(missing.kind, ToolErrorKind::Validation);

        let unknown = toolbox
            .dispatch(&call(RUN_TEAM, json!({"team_name": "nope", "task": "x"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(unknown.kind, ToolErrorKind::NotFound);

        let bad_turns = toolbox
            .dispatch(
                &call(RUN_TEAM, json!({"team_name": "review", "task": "x", "max_turns": 0})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(bad_turns.kind, ToolErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_ad_hoc_team_roles() {
        let env = env(Vec::new());
        let team = env
            .build_ad_hoc_team(&["extractor".into(), "critic".into(), "extractor".into()], 0, None)
            .unwrap();

        let roles: Vec<&str> = team.members().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["analyst", "critic", "analyst_2"]);
        assert_eq!(team.name(), "ad_hoc_extractor_critic_extractor");

        let toolbox = team_toolbox(&env).unwrap();
        let err = toolbox
            .dispatch(
                &call(RUN_AD_HOC_TEAM, json!({"participants": ["critic"], "task": "x"})),
                &ToolExecutionContext::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_list_teams() {
        let toolbox = team_toolbox(&env(Vec::new())).unwrap();
        let value = toolbox
            .dispatch(&call(LIST_TEAMS, json!({})), &ToolExecutionContext::new())
            .await
            .unwrap();

        assert_eq!(value["teams"][0]["name"], "review");
        assert_eq!(value["teams"][0]["members"][1]["participant"], "critic");
        assert_eq!(value["participants"].as_array().unwrap().len(), 1);
        assert_eq!(value["participants"][0]["role"], "analyst");
    }
}
