//! Registry discovery and resolution against file-based configuration

use noesis_core::prelude::*;
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Capability whose factory counts how often it runs
fn counted(name: &str, builds: Arc<AtomicUsize>) -> CapabilityDescriptor {
    CapabilityDescriptor::new(name, format!("{name} capability"), move |ctx| {
        builds.fetch_add(1, Ordering::SeqCst);
        let tool = FnTool::from_fn(
            ToolMetadata::new(ctx.name.clone(), "counted"),
            ToolSchema::empty(),
            |_args: Value, _ctx: ToolExecutionContext| async move { Ok(json!("ok")) },
        );
        Ok(Arc::new(tool) as Arc<dyn Tool>)
    })
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn shared_dependency_is_built_once() {
    let store = Arc::new(AtomicUsize::new(0));
    let search = Arc::new(AtomicUsize::new(0));
    let graph = Arc::new(AtomicUsize::new(0));

    let mut registry = CapabilityRegistry::new();
    registry.register(counted("store", store.clone())).unwrap();
    registry
        .register(counted("search", search.clone()).depends_on("store"))
        .unwrap();
    registry
        .register(
            counted("graph", graph.clone())
                .depends_on("store")
                .depends_on("search"),
        )
        .unwrap();

    let toolbox = registry.resolve_all(&NoesisConfig::default()).unwrap();

    assert_eq!(toolbox.names(), vec!["graph", "search", "store"]);
    assert_eq!(store.load(Ordering::SeqCst), 1);
    assert_eq!(search.load(Ordering::SeqCst), 1);
    assert_eq!(graph.load(Ordering::SeqCst), 1);
}

#[test]
fn cycle_is_reported_with_its_path() {
    let mut registry = CapabilityRegistry::new();
    let builds = Arc::new(AtomicUsize::new(0));
    registry
        .register(counted("a", builds.clone()).depends_on("b"))
        .unwrap();
    registry
        .register(counted("b", builds.clone()).depends_on("c"))
        .unwrap();
    registry
        .register(counted("c", builds.clone()).depends_on("a"))
        .unwrap();

    let err = registry.resolve("a", &NoesisConfig::default()).err().unwrap();
    match err {
        NoesisError::UnresolvedDependency { reason, .. } => {
            assert!(reason.contains("a -> b -> c -> a"), "{reason}");
        }
        other => panic!("expected unresolved dependency, got {other:?}"),
    }
    assert_eq!(builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dependent_capability_calls_its_dependency() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityDescriptor::new("download", "Fetch a paper", |ctx| {
            let tool = FnTool::from_fn(
                ToolMetadata::new(ctx.name.clone(), "Fetch a paper"),
                ToolSchema::empty(),
                |args: Value, _ctx: ToolExecutionContext| async move {
                    Ok(json!({ "text": format!("body of {}", args["id"].as_str().unwrap_or("?")) }))
                },
            );
            Ok(Arc::new(tool) as Arc<dyn Tool>)
        }))
        .unwrap();
    registry
        .register(
            CapabilityDescriptor::new("summarize", "Summarize a paper", |ctx| {
                let download = ctx.dependency("download")?;
                let tool = FnTool::from_fn(
                    ToolMetadata::new(ctx.name.clone(), "Summarize a paper"),
                    ToolSchema::empty(),
                    move |args: Value, ctx: ToolExecutionContext| {
                        let download = Arc::clone(&download);
                        async move {
                            let paper = download.execute(args, &ctx).await?.into_result()?;
                            let text = paper["text"].as_str().unwrap_or_default().to_string();
                            Ok::<_, ToolError>(json!({ "summary": text.to_uppercase() }))
                        }
                    },
                );
                Ok(Arc::new(tool) as Arc<dyn Tool>)
            })
            .depends_on("download"),
        )
        .unwrap();

    let toolbox = registry.resolve_all(&NoesisConfig::default()).unwrap();
    let call = ToolCall::new("toolu_1", "summarize", json!({"id": "p7"}));
    let value = toolbox
        .dispatch(&call, &ToolExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(value, json!({"summary": "BODY OF P7"}));
}

#[test]
fn bindings_read_values_from_config_file() {
    let file = config_file(
        r#"
[settings.papers]
dir = "/srv/papers"
page_size = 25
"#,
    );
    let config = NoesisConfig::from_file(file.path()).unwrap();

    let seen = Arc::new(std::sync::Mutex::new(None));
    let captured = Arc::clone(&seen);
    let mut registry = CapabilityRegistry::new();
    registry
        .register(
            CapabilityDescriptor::new("list_papers", "List papers", move |ctx| {
                let dir: Option<String> = ctx.param_as("dir")?;
                let page_size: Option<u64> = ctx.param_as("page_size")?;
                let sort: Option<String> = ctx.param_as("sort")?;
                let limit = ctx.param("limit").cloned();
                *captured.lock().unwrap() = Some((dir, page_size, sort, limit));

                let tool = FnTool::from_fn(
                    ToolMetadata::new(ctx.name.clone(), "List papers"),
                    ToolSchema::empty(),
                    |_args: Value, _ctx: ToolExecutionContext| async move { Ok(json!([])) },
                );
                Ok(Arc::new(tool) as Arc<dyn Tool>)
            })
            .bind("dir", "settings.papers.dir")
            .bind_or("page_size", "settings.papers.page_size", json!(10))
            .bind_or("sort", "settings.papers.sort", json!("date"))
            .bind_optional("limit", "settings.papers.limit"),
        )
        .unwrap();

    registry.resolve("list_papers", &config).unwrap();

    let (dir, page_size, sort, limit) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(dir.as_deref(), Some("/srv/papers"));
    assert_eq!(page_size, Some(25));
    assert_eq!(sort.as_deref(), Some("date"));
    assert_eq!(limit, None);
}

#[test]
fn missing_required_binding_names_the_key() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register(
            counted("download", Arc::new(AtomicUsize::new(0))).bind("dir", "settings.papers.dir"),
        )
        .unwrap();

    let err = registry
        .resolve("download", &NoesisConfig::default())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        NoesisError::MissingConfig { ref param, ref key, .. }
            if param == "dir" && key == "settings.papers.dir"
    ));
}

#[test]
fn config_declared_teams_are_discovered() {
    let file = config_file(
        r#"
[[teams]]
name = "review"
description = "Reads and critiques a paper"
default_max_turns = 4

[[teams.members]]
role = "reader"
participant = "reader"

[[teams.members]]
role = "critic"
participant = "critic"
instructions = "Be harsh."
"#,
    );
    let config = NoesisConfig::from_file(file.path()).unwrap();

    let source = StaticSource::new("papers").with_capability(counted(
        "download",
        Arc::new(AtomicUsize::new(0)),
    ));
    let mut registry = CapabilityRegistry::new();
    let report = registry.discover(&[&source, &config]).unwrap();

    assert_eq!(report.registered, vec!["download"]);
    assert_eq!(report.teams, vec!["review"]);

    let team = registry.team("review").unwrap();
    assert_eq!(team.default_max_turns, 4);
    assert_eq!(team.max_depth, 2);
    assert_eq!(team.members[1].instructions, "Be harsh.");
    assert!(matches!(registry.team("ghost"), Err(NoesisError::UnknownTeam(_))));
}
