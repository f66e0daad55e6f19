use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use tandem_agent::{AgentNode, Node, ParallelComposite, RunScope, Runner, SequentialComposite, Tool};
use tandem_core::config::{EngineConfig, JoinPolicy};
use tandem_core::error::{FailureKind, TandemError};
use tandem_core::traits::ModelClient;
use tandem_core::types::{ModelResponse, ToolResult};
use tandem_core::Context;
use tandem_test_utils::{context, DelayedModel, FailingModel, FnModel, ScriptedModel};
use tandem_tools::FnTool;

fn agent(name: &str, model: impl ModelClient, instruction: &str, output: &str) -> Node {
    AgentNode::new(name, Arc::new(model))
        .with_instruction(instruction)
        .with_output_key(output)
        .into()
}

fn answering(name: &str, text: &str, output: &str) -> Node {
    agent(name, ScriptedModel::answering(text), "", output)
}

/// Adds one to the number at the end of the instruction.
fn incrementer() -> FnModel {
    FnModel::new(|req| {
        let n: i64 = req
            .instruction
            .rsplit(' ')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(ModelResponse::answer((n + 1).to_string()))
    })
}

fn unvalidated() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.runner.validate = false;
    config
}

#[tokio::test]
async fn sequence_threads_writes_to_later_steps() {
    let root: Node = SequentialComposite::new(
        "pipeline",
        vec![
            answering("a", "1", "x"),
            agent("b", incrementer(), "Add one to {x}", "y"),
        ],
    )
    .into();

    let out = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap();

    let expected: BTreeMap<String, String> =
        [("x".to_string(), "1".to_string()), ("y".to_string(), "2".to_string())].into();
    assert_eq!(out.final_context(), expected);
}

#[tokio::test]
async fn sequence_later_writer_wins_and_is_observed() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_by_model = seen.clone();
    let observer = FnModel::new(move |req| {
        seen_by_model.lock().unwrap().push(req.instruction.to_string());
        Ok(ModelResponse::answer("done"))
    });

    let root: Node = SequentialComposite::new(
        "drafts",
        vec![
            answering("first", "draft one", "draft"),
            agent("check1", FnModel::echo(), "{draft}", "seen1"),
            answering("second", "draft two", "draft"),
            agent("check2", observer, "{draft}", "seen2"),
        ],
    )
    .into();

    let out = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap();

    assert_eq!(out.context.get_str("draft"), Some("draft two"));
    assert_eq!(out.context.get_str("seen1"), Some("draft one"));
    assert_eq!(*seen.lock().unwrap(), vec!["draft two".to_string()]);
}

#[tokio::test]
async fn sequence_aborts_at_first_failure() {
    let never_called = Arc::new(ScriptedModel::answering("unused"));
    let root: Node = SequentialComposite::new(
        "pipeline",
        vec![
            answering("a", "1", "x"),
            agent("b", FnModel::echo(), "Needs {missing}", "y"),
            AgentNode::new("c", never_called.clone())
                .with_output_key("z")
                .into(),
        ],
    )
    .into();

    let report = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap_err();

    assert_eq!(report.kind, FailureKind::MissingContextKey);
    assert_eq!(report.at_node, "b");
    assert_eq!(report.partial_context.get_str("x"), Some("1"));
    assert!(!report.partial_context.contains("y"));
    assert_eq!(never_called.call_count(), 0);
}

#[tokio::test]
async fn parallel_branches_see_only_the_pre_fork_snapshot() {
    // Each branch echoes the optional sibling key; neither should see the other's write.
    let root: Node = ParallelComposite::new(
        "fanout",
        vec![
            agent("left", FnModel::echo(), "{topic}/{right?}", "left"),
            agent("right", FnModel::echo(), "{topic}/{left?}", "right"),
        ],
    )
    .into();

    let out = Runner::new(EngineConfig::default())
        .run(&root, context(&[("topic", "bees")]))
        .await
        .unwrap();

    assert_eq!(out.context.get_str("left"), Some("bees/"));
    assert_eq!(out.context.get_str("right"), Some("bees/"));
    assert_eq!(out.context.get_str("topic"), Some("bees"));
    assert_eq!(out.context.len(), 3);
}

async fn run_with_delays(first: u64, second: u64) -> Context {
    let slow = |text: &'static str, ms: u64| {
        DelayedModel::new(
            Arc::new(ScriptedModel::answering(text)),
            Duration::from_millis(ms),
        )
    };
    let root: Node = ParallelComposite::new(
        "audiences",
        vec![
            agent("children", slow("for kids", first), "", "children_article"),
            agent("executive", slow("for execs", second), "", "executive_article"),
        ],
    )
    .into();

    Runner::new(EngineConfig::default())
        .run(&root, context(&[("initial_facts", "facts")]))
        .await
        .unwrap()
        .context
}

#[tokio::test(start_paused = true)]
async fn parallel_merge_is_independent_of_completion_order() {
    let children_first = run_with_delays(10, 50).await;
    let executive_first = run_with_delays(50, 10).await;

    assert_eq!(children_first, executive_first);
    assert_eq!(
        serde_json::to_string(&children_first).unwrap(),
        serde_json::to_string(&executive_first).unwrap()
    );
    assert_eq!(children_first.len(), 3);
}

#[tokio::test]
async fn parallel_declared_key_conflict_fails_at_merge() {
    let root: Node = ParallelComposite::new(
        "dupes",
        vec![answering("c", "one", "k"), answering("d", "two", "k")],
    )
    .into();

    let report = Runner::new(unvalidated())
        .run(&root, Context::new())
        .await
        .unwrap_err();

    assert_eq!(report.kind, FailureKind::KeyConflict);
    assert_eq!(report.at_node, "dupes");
    assert!(report.message.contains("'k'"), "{}", report.message);
    assert!(!report.partial_context.contains("k"));
}

#[tokio::test]
async fn same_named_branches_writing_one_key_still_conflict() {
    let root: Node = ParallelComposite::new(
        "dupes",
        vec![answering("w", "one", "k"), answering("w", "two", "k")],
    )
    .into();

    let report = Runner::new(unvalidated())
        .run(&root, Context::new())
        .await
        .unwrap_err();

    assert_eq!(report.kind, FailureKind::KeyConflict);
    assert_eq!(report.at_node, "dupes");
    assert!(!report.partial_context.contains("k"));
}

#[tokio::test]
async fn parallel_declared_key_conflict_is_caught_before_running() {
    let model = Arc::new(ScriptedModel::answering("one"));
    let root: Node = ParallelComposite::new(
        "dupes",
        vec![
            AgentNode::new("c", model.clone()).with_output_key("k").into(),
            answering("d", "two", "k"),
        ],
    )
    .into();

    let report = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap_err();

    assert_eq!(report.kind, FailureKind::KeyConflict);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn parallel_dynamic_tool_write_conflict_fails_at_merge() {
    let writer = Arc::new(FnTool::new("note", "Record a note", |_, ctx| {
        ctx.set_state("scratch", json!(ctx.node.clone()));
        ToolResult::success("noted")
    }));
    let branch = |name: &str, output: &str| -> Node {
        AgentNode::new(
            name,
            Arc::new(ScriptedModel::new(vec![
                ModelResponse::call("note", json!({})),
                ModelResponse::answer("ok"),
            ])),
        )
        .with_tool(Tool::from(writer.clone()))
        .with_output_key(output)
        .into()
    };
    let root: Node = ParallelComposite::new("group", vec![branch("c", "c"), branch("d", "d")]).into();

    let report = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap_err();

    assert_eq!(report.kind, FailureKind::KeyConflict);
    assert!(report.message.contains("'scratch'"), "{}", report.message);
    assert!(report.message.contains("c") && report.message.contains("d"));
    assert!(!report.partial_context.contains("c"));
    assert!(!report.partial_context.contains("scratch"));
}

#[tokio::test]
async fn parallel_partial_failure_keeps_successes() {
    let root: Node = ParallelComposite::new(
        "group",
        vec![
            answering("c", "ok", "c"),
            agent("d", FailingModel::new("upstream 503"), "", "d"),
        ],
    )
    .into();

    let mut ctx = Context::new();
    let err = root.execute(&mut ctx, &RunScope::detached()).await.unwrap_err();

    match err {
        TandemError::PartialFailure {
            node,
            successes,
            failures,
        } => {
            assert_eq!(node, "group");
            assert_eq!(successes, vec![("c".to_string(), json!("ok"))]);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].branch, "d");
            assert_eq!(failures[0].error.kind(), FailureKind::ModelInvocationError);
        }
        other => panic!("expected PartialFailure, got {other:?}"),
    }
    assert_eq!(ctx.get_str("c"), Some("ok"));
    assert!(!ctx.contains("d"));
}

#[tokio::test]
async fn parallel_partial_failure_report() {
    let root: Node = ParallelComposite::new(
        "group",
        vec![
            answering("c", "ok", "c"),
            agent("d", FailingModel::new("upstream 503"), "", "d"),
        ],
    )
    .into();

    let report = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap_err();

    assert_eq!(report.kind, FailureKind::PartialFailure);
    assert_eq!(report.at_node, "group");
    assert_eq!(report.merged, vec!["c"]);
    assert_eq!(report.branches.len(), 1);
    assert_eq!(report.branches[0].branch, "d");
    assert_eq!(report.branches[0].kind, FailureKind::ModelInvocationError);
    assert_eq!(report.partial_context.get_str("c"), Some("ok"));
    assert!(!report.partial_context.contains("d"));
}

#[tokio::test]
async fn panicking_branch_fails_alone() {
    let root: Node = ParallelComposite::new(
        "group",
        vec![
            answering("c", "ok", "c"),
            agent("d", FnModel::new(|_| panic!("collaborator bug")), "", "d"),
        ],
    )
    .into();

    let report = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap_err();

    assert_eq!(report.kind, FailureKind::PartialFailure);
    assert_eq!(report.at_node, "group");
    assert_eq!(report.merged, vec!["c"]);
    assert_eq!(report.branches.len(), 1);
    assert_eq!(report.branches[0].branch, "d");
    assert_eq!(report.branches[0].at_node, "d");
    assert_eq!(report.branches[0].kind, FailureKind::InternalOrchestrationError);
    assert!(report.branches[0].message.contains("collaborator bug"));
    assert_eq!(report.partial_context.get_str("c"), Some("ok"));
}

#[tokio::test]
async fn all_or_nothing_policy_discards_successes() {
    let root: Node = ParallelComposite::new(
        "group",
        vec![
            answering("c", "ok", "c"),
            agent("d", FailingModel::new("down"), "", "d"),
        ],
    )
    .with_join_policy(JoinPolicy::AllOrNothing)
    .into();

    let report = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap_err();

    assert_eq!(report.kind, FailureKind::PartialFailure);
    assert!(report.merged.is_empty());
    assert!(report.partial_context.is_empty());
}

#[tokio::test(start_paused = true)]
async fn bounded_concurrency_still_runs_every_branch() {
    let branch = |name: &str, key: &str| -> Node {
        agent(
            name,
            DelayedModel::new(Arc::new(FnModel::echo()), Duration::from_millis(20)),
            name,
            key,
        )
    };
    let root: Node = ParallelComposite::new(
        "group",
        vec![branch("a", "a"), branch("b", "b"), branch("c", "c")],
    )
    .with_max_concurrency(1)
    .into();

    let start = tokio::time::Instant::now();
    let out = Runner::new(EngineConfig::default())
        .run(&root, Context::new())
        .await
        .unwrap();

    assert_eq!(out.context.len(), 3);
    assert!(start.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn empty_composites_succeed_without_changes() {
    let root: Node = SequentialComposite::new(
        "outer",
        vec![ParallelComposite::new("nothing", vec![]).into()],
    )
    .into();

    let out = Runner::new(EngineConfig::default())
        .run(&root, context(&[("k", "v")]))
        .await
        .unwrap();
    assert_eq!(out.context, context(&[("k", "v")]));
}

#[tokio::test]
async fn content_pipeline_is_reproducible() {
    let build = || -> Node {
        SequentialComposite::new(
            "content_creator",
            vec![
                answering("topic_identifier", "urban beekeeping", "user_topic"),
                agent(
                    "topic_expander",
                    FnModel::echo(),
                    "Facts about {user_topic}",
                    "initial_facts",
                ),
                ParallelComposite::new(
                    "authoring",
                    vec![
                        agent("children", FnModel::echo(), "Kids: {initial_facts}", "children_article"),
                        agent("executive", FnModel::echo(), "Execs: {initial_facts}", "executive_article"),
                    ],
                )
                .into(),
            ],
        )
        .into()
    };

    let runner = Runner::new(EngineConfig::default());
    let first = runner.run(&build(), Context::new()).await.unwrap();
    let second = runner.run(&build(), Context::new()).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(
        serde_json::to_vec(&first.context).unwrap(),
        serde_json::to_vec(&second.context).unwrap()
    );
    assert_eq!(
        first.context.get_str("executive_article"),
        Some("Execs: Facts about urban beekeeping")
    );
}

#[test]
fn composite_output_keys_are_the_union_of_children() {
    let root: Node = SequentialComposite::new(
        "outer",
        vec![
            answering("a", "", "x"),
            ParallelComposite::new(
                "inner",
                vec![answering("b", "", "y"), answering("c", "", "x")],
            )
            .into(),
        ],
    )
    .into();

    assert_eq!(root.output_keys(), vec!["x", "y"]);
    assert!(root.outline().contains("  inner (parallel) -> y, x"));
}
