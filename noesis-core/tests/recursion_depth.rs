//! Depth-bounded research: sessions, nested research and sub-teams

use noesis_core::prelude::*;
use noesis_core::runner::InvocationOutcome;
use noesis_core::team::{RecursiveSession, RoleScoped, team_toolbox};
use serde_json::{Map, Value, json};
use std::sync::Arc;

fn environment(oracle: Arc<ScriptedOracle>, registry: CapabilityRegistry) -> Arc<TeamEnvironment> {
    Arc::new(TeamEnvironment::new(
        oracle,
        Arc::new(Toolbox::new()),
        Arc::new(registry),
        Arc::new(ParticipantCatalog::new()),
    ))
}

fn analyst(oracle: Arc<ScriptedOracle>) -> Arc<dyn Participant> {
    Arc::new(OracleParticipant::new("analyst", "Analyze carefully.", oracle))
}

fn tool_names(request: &LLMRequest) -> Vec<String> {
    request.tools.iter().map(|t| t.name.clone()).collect()
}

#[tokio::test]
async fn member_at_ceiling_answers_in_one_call() {
    let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedReply::text("short answer")]));
    let env = environment(oracle.clone(), CapabilityRegistry::new());

    let member = RoleScoped::new(
        analyst(oracle.clone()),
        "critic",
        RecursionContext::new(2, 2),
        env.clone(),
    );
    let answer = member.process("Critique this", &Map::new()).await.unwrap();

    assert_eq!(answer, json!("short answer"));
    assert_eq!(oracle.call_count(), 1);
    assert!(oracle.requests()[0].tools.is_empty());
    assert!(env.meta_log().is_empty());
}

#[tokio::test]
async fn member_below_ceiling_researches_one_level_deeper() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        ScriptedReply::tool("research", json!({"query": "background"})),
        ScriptedReply::text("nested findings"),
        ScriptedReply::text("final answer"),
    ]));
    let env = environment(oracle.clone(), CapabilityRegistry::new());

    let member = RoleScoped::new(
        analyst(oracle.clone()),
        "analyst",
        RecursionContext::new(0, 2),
        env.clone(),
    );
    let answer = member.process("Study the topic", &Map::new()).await.unwrap();

    assert_eq!(answer, json!("final answer"));
    assert_eq!(oracle.call_count(), 3);

    let requests = oracle.requests();
    assert_eq!(
        tool_names(&requests[0]),
        vec!["list_teams", "run_ad_hoc_team", "run_team", "research"]
    );
    // depth 1 is the last level that may use tools, so no further research
    assert!(!tool_names(&requests[1]).contains(&"research".to_string()));
    assert_eq!(requests[1].messages.last().unwrap().content, "background");

    let meta = env.meta_log();
    assert_eq!(meta.len(), 2);
    assert!(meta[0].starts_with("[research depth=1] query: background"));
    assert!(meta[1].starts_with("[research depth=0]"));
    assert!(meta[1].contains("tools: research"));
    assert!(meta[1].contains("nested research: 1"));
}

#[tokio::test]
async fn research_context_is_folded_into_the_query() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        ScriptedReply::tool(
            "research",
            json!({"query": "who wrote it", "context": "a paper on borrow checking"}),
        ),
        ScriptedReply::text("Someone"),
        ScriptedReply::text("done"),
    ]));
    let env = environment(oracle.clone(), CapabilityRegistry::new());

    let report = RecursiveSession::new(env, oracle.clone(), RecursionContext::new(0, 3))
        .run("Find the author", &Map::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.result, "done");
    assert_eq!(
        oracle.requests()[1].messages.last().unwrap().content,
        "Research query: who wrote it\n\nCurrent context:\na paper on borrow checking"
    );
}

#[tokio::test]
async fn session_runs_sub_team_one_level_deeper() {
    let session_oracle = Arc::new(ScriptedOracle::new(vec![
        ScriptedReply::tool(
            "run_team",
            json!({"team_name": "poetry", "task": "A poem about frogs"}),
        ),
        ScriptedReply::text("The team wrote a poem"),
    ]));
    let poet_oracle = Arc::new(ScriptedOracle::repeating(ScriptedReply::text("old pond")));

    let mut catalog = ParticipantCatalog::new();
    catalog
        .register(Arc::new(OracleParticipant::new("poet", "Write poems.", poet_oracle.clone())))
        .unwrap();

    let mut registry = CapabilityRegistry::new();
    registry
        .register_team(
            TeamDefinition::new("poetry", "Writes poems")
                .with_member(TeamMemberSpec::new("writer", "poet"))
                .with_max_depth(1),
        )
        .unwrap();

    let coordinator = Arc::new(ScriptedCoordinator::new(vec![
        DelegationDecision::delegate("writer", "Write it").with_output("poem"),
        DelegationDecision::terminate(Some("poem")),
    ]));
    let env = Arc::new(
        TeamEnvironment::new(
            session_oracle.clone(),
            Arc::new(Toolbox::new()),
            Arc::new(registry),
            Arc::new(catalog),
        )
        .with_coordinator(coordinator),
    );

    let session = RecursiveSession::new(env.clone(), session_oracle.clone(), RecursionContext::new(0, 2));
    let report = session.run("Get me a poem", &Map::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(poet_oracle.call_count(), 1);
    assert!(poet_oracle.requests()[0].tools.is_empty());

    let meta = env.meta_log();
    assert_eq!(meta.len(), 1);
    assert!(meta[0].contains("tools: run_team"));
    assert!(meta[0].contains("sub-teams: 1"));

    let feedback = session_oracle.requests()[1]
        .messages
        .last()
        .unwrap()
        .content
        .clone();
    let outcome: Value = serde_json::from_str(&feedback).unwrap();
    assert_eq!(outcome["status"]["state"], "completed");
    assert_eq!(outcome["output"], "old pond");
}

#[tokio::test]
async fn nested_research_failure_is_reported_as_tool_error() {
    // the nested session exhausts the script, so it fails instead of completing
    let oracle = Arc::new(ScriptedOracle::new(vec![
        ScriptedReply::tool("research", json!({"query": "anything"})),
    ]));
    let env = environment(oracle.clone(), CapabilityRegistry::new());

    let report = RecursiveSession::new(env, oracle.clone(), RecursionContext::new(0, 2))
        .run("Try", &Map::new())
        .await
        .unwrap();

    // the outer loop also runs out of replies after the failed research call
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(oracle.call_count(), 3);
    let tool_message = oracle.requests()[2].messages.last().unwrap().clone();
    assert!(tool_message.is_error);
    assert!(tool_message.content.contains("nested research did not complete"));
}

#[tokio::test]
async fn shallow_team_entered_deep_runs_at_its_own_ceiling() {
    let poet_oracle = Arc::new(ScriptedOracle::repeating(ScriptedReply::text("old pond")));
    let mut catalog = ParticipantCatalog::new();
    catalog
        .register(Arc::new(OracleParticipant::new("poet", "Write poems.", poet_oracle.clone())))
        .unwrap();

    let definition = TeamDefinition::new("poetry", "Writes poems")
        .with_member(TeamMemberSpec::new("writer", "poet"))
        .with_max_depth(1);
    let coordinator = Arc::new(ScriptedCoordinator::new(vec![
        DelegationDecision::delegate("writer", "Write it").with_output("poem"),
        DelegationDecision::terminate(Some("poem")),
    ]));
    let env = Arc::new(
        TeamEnvironment::new(
            poet_oracle.clone(),
            Arc::new(Toolbox::new()),
            Arc::new(CapabilityRegistry::new()),
            Arc::new(catalog),
        )
        .with_coordinator(coordinator),
    );

    let member = RoleScoped::new(
        analyst(poet_oracle.clone()),
        "writer",
        RecursionContext::new(3, definition.max_depth),
        env.clone(),
    );
    assert_eq!(member.context().depth, 1);

    let outcome = env
        .build_team(&definition, 3, None)
        .unwrap()
        .run("A poem", Map::new())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.output_text(), "old pond");
    assert_eq!(poet_oracle.call_count(), 1);
    assert!(poet_oracle.requests()[0].tools.is_empty());
    assert!(env.meta_log().is_empty());
}

#[test]
fn depth_rules() {
    let context = RecursionContext::new(0, 2);
    assert!(context.can_research());
    assert!(context.can_descend());

    let deeper = context.descend();
    assert_eq!(deeper.depth, 1);
    assert!(deeper.can_research());
    assert!(!deeper.can_descend());

    assert!(!deeper.descend().can_research());
}

#[tokio::test]
async fn invocation_records_keep_request_ids() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        ScriptedReply::tool("list_teams", json!({})),
        ScriptedReply::text("no teams"),
    ]));
    let env = environment(oracle.clone(), CapabilityRegistry::new());
    let dispatcher = Arc::new(team_toolbox(&env).unwrap());

    let outcome = ToolUseRunner::new(oracle, dispatcher)
        .run(vec![Message::user("Which teams exist?")])
        .await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.invocations[0].request_id, "toolu_0_0");
    match &outcome.invocations[0].outcome {
        InvocationOutcome::Success(value) => assert_eq!(value["teams"], json!([])),
        other => panic!("expected success, got {other:?}"),
    }
}
