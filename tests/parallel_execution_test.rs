use anyhow::{Result, anyhow};
use async_trait::async_trait;
use faasflow::activities::{ActivityHandler, ActivityInput, ActivityRegistry};
use faasflow::dsl::Workflow;
use faasflow::dsl::builder::WorkflowBuilder;
use faasflow::error::StepError;
use faasflow::runtime::Interpreter;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct SleepActivity {
    name: String,
    duration_ms: u64,
}

#[async_trait]
impl ActivityHandler for SleepActivity {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: ActivityInput) -> Result<Value> {
        tokio::time::sleep(Duration::from_millis(self.duration_ms)).await;
        Ok(json!({ "slept": self.name }))
    }
}

fn registry() -> Arc<ActivityRegistry> {
    let registry = ActivityRegistry::new();
    registry.register_fn("single", |_| Ok(json!("A")));
    registry.register_fn("label", |p| Ok(json!(format!("r{}", p.as_i64().unwrap_or(-1)))));
    registry.register_fn("shout", |p| Ok(json!(p.as_str().unwrap_or_default().to_uppercase())));
    registry.register_fn("inc", |p| Ok(json!(p.as_i64().unwrap_or(0) + 1)));
    registry.register_fn("boom", |_| Err(anyhow!("branch exploded")));
    Arc::new(registry)
}

#[tokio::test]
async fn test_parallel_merges_single_and_map_branches() {
    let workflow = Workflow::from_value(json!({
        "root": "p",
        "states": {
            "p": {
                "type": "parallel",
                "funcs": [
                    { "name": "A", "root": "a", "states": { "a": { "type": "task", "func_name": "single" } } },
                    { "name": "B", "root": "b", "states": { "b": { "type": "map", "func_name": "label", "array": "xs" } } }
                ]
            }
        }
    }))
    .unwrap();

    let execution = Interpreter::new(registry())
        .run(&workflow, json!({ "xs": [0, 1, 2] }))
        .await
        .unwrap();

    assert_eq!(
        execution.payload,
        json!({ "A": "A", "B": ["r0", "r1", "r2"] })
    );
}

#[tokio::test]
async fn test_branch_keys_default_to_first_function() {
    let a = WorkflowBuilder::new("first").task("first", "single", None).build().unwrap();
    let b = WorkflowBuilder::new("second")
        .map("second", "label", "xs")
        .build()
        .build()
        .unwrap();

    let workflow = WorkflowBuilder::new("p")
        .parallel("p", vec![a, b], Some("after"))
        .task("after", "single", None)
        .build()
        .unwrap();

    // Stop before `after` to inspect the merged payload.
    let mut merged_only = workflow.clone();
    if let Some(faasflow::dsl::State::Parallel(p)) = merged_only.states.get_mut("p") {
        p.next = None;
    }

    let execution = Interpreter::new(registry())
        .run(&merged_only, json!({ "xs": [7] }))
        .await
        .unwrap();

    // A one-element map branch yields its bare result.
    assert_eq!(execution.payload, json!({ "single": "A", "label": "r7" }));
}

#[tokio::test]
async fn test_map_branch_shape_follows_call_count() {
    let workflow = Workflow::from_value(json!({
        "root": "p",
        "states": {
            "p": {
                "type": "parallel",
                "funcs": [
                    { "root": "b", "states": { "b": { "type": "map", "func_name": "label", "array": "xs" } } }
                ]
            }
        }
    }))
    .unwrap();
    let interpreter = Interpreter::new(registry());

    let one = interpreter.run(&workflow, json!({ "xs": [7] })).await.unwrap();
    assert_eq!(one.payload, json!({ "label": "r7" }));

    let two = interpreter.run(&workflow, json!({ "xs": [7, 8] })).await.unwrap();
    assert_eq!(two.payload, json!({ "label": ["r7", "r8"] }));

    let none = interpreter.run(&workflow, json!({ "xs": [] })).await.unwrap();
    assert_eq!(none.payload, json!({ "label": [] }));
}

#[tokio::test]
async fn test_map_branch_with_continuation_runs_per_element() {
    let workflow = Workflow::from_value(json!({
        "root": "p",
        "states": {
            "p": {
                "type": "parallel",
                "funcs": [{
                    "root": "m",
                    "states": {
                        "m": { "type": "map", "func_name": "inc", "array": "xs", "next": "again" },
                        "again": { "type": "task", "func_name": "inc" }
                    }
                }]
            }
        }
    }))
    .unwrap();

    let execution = Interpreter::new(registry())
        .run(&workflow, json!({ "xs": [1, 10] }))
        .await
        .unwrap();

    assert_eq!(execution.payload, json!({ "inc": [3, 12] }));
}

#[tokio::test]
async fn test_multi_step_task_branch() {
    let chain = WorkflowBuilder::new("one")
        .task("one", "inc", Some("two"))
        .task("two", "inc", None)
        .build()
        .unwrap();
    let plain = WorkflowBuilder::new("x").task("x", "single", None).build().unwrap();

    let workflow = WorkflowBuilder::new("p")
        .parallel("p", vec![chain, plain], None)
        .build()
        .unwrap();

    let execution = Interpreter::new(registry()).run(&workflow, json!(40)).await.unwrap();
    assert_eq!(execution.payload, json!({ "inc": 42, "single": "A" }));
}

#[tokio::test]
async fn test_parallel_branches_run_concurrently() {
    let registry = ActivityRegistry::new();
    let mut branches = Vec::new();
    for i in 0..3 {
        let name = format!("sleep_{i}");
        registry.register(Arc::new(SleepActivity {
            name: name.clone(),
            duration_ms: 300,
        }));
        branches.push(WorkflowBuilder::new(&name).task(&name, &name, None).build().unwrap());
    }

    let workflow = WorkflowBuilder::new("p")
        .parallel("p", branches, None)
        .build()
        .unwrap();

    let started = Instant::now();
    let execution = Interpreter::new(Arc::new(registry))
        .run(&workflow, json!({}))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(800), "took {elapsed:?}");
    assert_eq!(execution.payload["sleep_2"], json!({ "slept": "sleep_2" }));
}

#[tokio::test]
async fn test_nested_sub_workflows_two_levels_deep() {
    let inner = WorkflowBuilder::new("i").task("i", "inc", None).build().unwrap();
    let middle = WorkflowBuilder::new("mid")
        .map_workflow("mid", inner, "ys")
        .build()
        .build()
        .unwrap();
    let workflow = WorkflowBuilder::new("outer")
        .map_workflow("outer", middle, "groups")
        .build()
        .build()
        .unwrap();

    let payload = json!({ "groups": [ { "ys": [1, 2] }, { "ys": [3] } ] });

    let execution = Interpreter::new(registry())
        .run(&workflow, payload.clone())
        .await
        .unwrap();
    assert_eq!(
        execution.payload,
        json!({ "groups": [ { "ys": [2, 3] }, { "ys": [4] } ] })
    );

    let err = Interpreter::new(registry())
        .max_depth(1)
        .run(&workflow, payload)
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), StepError::DepthExceeded { limit: 1 }));
}

#[tokio::test]
async fn test_failed_branch_fails_parallel_state() {
    let ok = WorkflowBuilder::new("a").task("a", "single", None).build().unwrap();
    let bad = WorkflowBuilder::new("b").task("b", "boom", None).build().unwrap();

    let workflow = WorkflowBuilder::new("p")
        .parallel("p", vec![ok, bad], None)
        .build()
        .unwrap();

    let err = Interpreter::new(registry())
        .run(&workflow, json!({ "untouched": true }))
        .await
        .unwrap_err();

    assert_eq!(err.state, "p");
    assert_eq!(err.payload, json!({ "untouched": true }));
}

#[tokio::test]
async fn test_parallel_then_next_state_sees_merged_payload() {
    let registry = ActivityRegistry::new();
    registry.register_fn("left", |_| Ok(json!("L")));
    registry.register_fn("right", |_| Ok(json!("R")));
    registry.register_fn("join", |p| {
        Ok(json!(format!(
            "{}{}",
            p["left"].as_str().unwrap_or_default(),
            p["right"].as_str().unwrap_or_default()
        )))
    });

    let left = WorkflowBuilder::new("l").task("l", "left", None).build().unwrap();
    let right = WorkflowBuilder::new("r").task("r", "right", None).build().unwrap();
    let workflow = WorkflowBuilder::new("p")
        .parallel("p", vec![left, right], Some("j"))
        .task("j", "join", None)
        .build()
        .unwrap();

    let execution = Interpreter::new(Arc::new(registry))
        .run(&workflow, json!(null))
        .await
        .unwrap();

    assert_eq!(execution.payload, json!("LR"));
    assert_eq!(execution.trace, vec!["p", "j"]);
}
