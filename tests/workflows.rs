use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use tandem_agent::{validate, ModelRegistry, Node, Runner, WorkflowDefinition};
use tandem_core::config::EngineConfig;
use tandem_core::error::TandemError;
use tandem_core::types::{ModelResponse, ToolCall, ToolResult};
use tandem_test_utils::{context, write_temp_file, FnModel};
use tandem_tools::ToolRegistry;

fn workflow(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("workflows")
        .join(name)
}

fn build(name: &str, model: FnModel) -> Node {
    let definition = WorkflowDefinition::load(&workflow(name)).expect("load workflow");
    let models = ModelRegistry::new().with_fallback(Arc::new(model));
    definition
        .build(&models, &ToolRegistry::new())
        .expect("build workflow")
}

#[tokio::test]
async fn test_content_creator_end_to_end() {
    let model = FnModel::new(|req| {
        Ok(match req.node {
            "topic_identifier" => ModelResponse::answer("honeybees"),
            node => ModelResponse::answer(format!("{}: {}", node, req.instruction.trim())),
        })
    });
    let root = build("content_creator.toml", model);

    let report = validate(&root, ["user_request"]).unwrap();
    assert!(report.is_clean(), "{:?}", report.warnings);

    let out = Runner::new(EngineConfig::default())
        .run(&root, context(&[("user_request", "tell me about bees")]))
        .await
        .unwrap();

    let keys: Vec<&str> = out.context.keys().collect();
    assert_eq!(
        keys,
        vec![
            "children_article",
            "executive_article",
            "initial_facts",
            "user_request",
            "user_topic"
        ]
    );
    assert_eq!(out.context.get_str("user_topic"), Some("honeybees"));
    assert!(out.context.get_str("initial_facts").unwrap().contains("honeybees"));
    let children = out.context.get_str("children_article").unwrap();
    assert!(children.starts_with("children_audience: "));
    assert!(children.contains("topic_expander: Expand the topic honeybees"));
}

#[tokio::test]
async fn test_culinary_guide_delegates_to_both_tools() {
    let model = FnModel::new(|req| {
        if req.node == "polish_culinary_agent" {
            return Ok(ModelResponse::answer(format!(
                "Pierogi ruskie ({})",
                req.instruction.lines().nth(3).unwrap_or("").trim()
            )));
        }
        if req.tool_rounds() == 0 {
            return Ok(ModelResponse::ToolCalls(vec![
                ToolCall::new("polish_culinary_agent", json!({"request": "dania wegańskie"})),
                ToolCall::new("german_food_tool", json!({"diet": "Vegan"})),
            ]));
        }
        let lines: Vec<String> = req
            .last_tool_results()
            .into_iter()
            .map(|(tool, result)| match result {
                ToolResult::Success { result } => format!("{}: {}", tool, result),
                ToolResult::Error { error_message } => format!("{}: {}", tool, error_message),
            })
            .collect();
        Ok(ModelResponse::answer(lines.join("\n")))
    });
    let root = build("culinary_guide.toml", model);

    let out = Runner::new(EngineConfig::default())
        .run(&root, context(&[("user_request", "vegan food from Poland and Germany")]))
        .await
        .unwrap();

    let answer = out.context.get_str("recommendations").unwrap();
    assert!(answer.contains("Pierogi ruskie (dania wegańskie)"), "{answer}");
    assert!(answer.contains("Spätzle"), "{answer}");
    assert!(!out.context.contains("polish_dishes"));
    assert!(!out.context.contains("request"));
}

#[tokio::test]
async fn test_culinary_guide_unknown_diet_reaches_model_as_error() {
    let model = FnModel::new(|req| {
        if req.tool_rounds() == 0 {
            return Ok(ModelResponse::call("german_food_tool", json!({"diet": "keto"})));
        }
        let (_, result) = req.last_tool_results()[0];
        Ok(ModelResponse::answer(
            serde_json::to_string(result).unwrap_or_default(),
        ))
    });
    let root = build("culinary_guide.toml", model);

    let out = Runner::new(EngineConfig::default())
        .run(&root, context(&[("user_request", "keto food")]))
        .await
        .unwrap();

    let answer: serde_json::Value =
        serde_json::from_str(out.context.get_str("recommendations").unwrap()).unwrap();
    assert_eq!(
        answer,
        json!({
            "status": "error",
            "error_message": "German food recommendation for: 'keto' is not available."
        })
    );
}

#[test]
fn test_workflow_model_names_expand_env_defaults() {
    let (_dir, path) = write_temp_file(
        "wf.toml",
        r#"
[root]
type = "agent"
name = "solo"
model = "${TANDEM_TEST_UNSET_WORKFLOW_MODEL:-local-model}"
output_key = "out"
"#,
    );
    let definition = WorkflowDefinition::load(&path).unwrap();
    assert_eq!(
        definition.model_names().into_iter().collect::<Vec<_>>(),
        vec!["local-model"]
    );
}

#[test]
fn test_missing_workflow_file() {
    let err = WorkflowDefinition::load(&workflow("does_not_exist.toml")).unwrap_err();
    assert!(matches!(err, TandemError::ConfigNotFound(_)));
}

#[test]
fn test_duplicate_tool_definitions_are_rejected() {
    let definition = WorkflowDefinition::parse(
        r#"
[[tools]]
name = "lookup"
description = "a"
field = "k"
entries = {}

[[tools]]
name = "lookup"
description = "b"
field = "k"
entries = {}

[root]
type = "agent"
name = "solo"
model = "m"
"#,
    )
    .unwrap();
    let models = ModelRegistry::new().with_fallback(Arc::new(FnModel::echo()));
    let err = definition.build(&models, &ToolRegistry::new()).unwrap_err();
    assert!(err.to_string().contains("defined more than once"));
}
