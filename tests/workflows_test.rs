use faasflow::compiler::{Generator, WorkflowsGenerator};
use faasflow::dsl::builder::WorkflowBuilder;
use faasflow::dsl::{Comparison, Workflow};
use faasflow::error::CompilationError;
use faasflow::resolver::TemplateResolver;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

fn generator() -> WorkflowsGenerator {
    WorkflowsGenerator::new(
        Arc::new(TemplateResolver::new("http://localhost:8080/{name}")),
        "flow",
    )
}

/// Generates, exports and parses back the main document.
fn compile(generator: &mut WorkflowsGenerator, workflow: &Workflow) -> Value {
    let yaml = generator.generate(workflow).expect("generation failed");
    serde_yaml::from_str(&yaml).expect("output is valid YAML")
}

fn main_steps(document: &Value) -> &Vec<Value> {
    document["main"]["steps"].as_array().expect("main.steps")
}

fn step<'a>(steps: &'a [Value], name: &str) -> &'a Value {
    steps
        .iter()
        .find_map(|s| s.get(name))
        .unwrap_or_else(|| panic!("no step named {name}"))
}

fn step_names(steps: &[Value]) -> Vec<String> {
    steps
        .iter()
        .flat_map(|s| s.as_object().into_iter().flat_map(|o| o.keys().cloned()))
        .collect()
}

#[test]
fn test_task_becomes_call_and_unwrap() {
    let workflow = WorkflowBuilder::new("a")
        .task("a", "inc", Some("b"))
        .task("b", "double", None)
        .build()
        .unwrap();

    let document = compile(&mut generator(), &workflow);
    let steps = main_steps(&document);

    assert_eq!(document["main"]["params"], json!(["input"]));
    assert_eq!(
        step_names(steps),
        vec!["init", "a", "a_result", "b", "b_result", "workflow_end"]
    );
    assert_eq!(step(steps, "init")["next"], "a");
    assert_eq!(
        step(steps, "a"),
        &json!({
            "call": "http.post",
            "args": {
                "url": "http://localhost:8080/inc",
                "body": { "request_id": "${request_id}", "payload": "${payload}" }
            },
            "result": "payload"
        })
    );
    assert_eq!(
        step(steps, "a_result"),
        &json!({ "assign": [ { "payload": "${payload.body}" } ], "next": "b" })
    );
    assert_eq!(step(steps, "b_result")["next"], "workflow_end");
    assert_eq!(step(steps, "workflow_end"), &json!({ "return": "${payload}" }));
}

#[test]
fn test_switch_conditions() {
    let workflow = WorkflowBuilder::new("route")
        .switch("route")
        .case("x", Comparison::LessThan, 5, "a")
        .case("user.name", Comparison::Equals, "bob", "a")
        .build()
        .task("a", "inc", None)
        .build()
        .unwrap();

    let document = compile(&mut generator(), &workflow);
    let route = step(main_steps(&document), "route");

    assert_eq!(
        route["switch"],
        json!([
            { "condition": "${payload.x < 5}", "next": "a" },
            { "condition": "${payload.user.name == \"bob\"}", "next": "a" }
        ])
    );
    assert_eq!(route["next"], "workflow_end");
}

#[test]
fn test_trivial_map_is_inlined() {
    let workflow = WorkflowBuilder::new("m")
        .map("m", "square", "xs")
        .max_concurrency(4)
        .build()
        .build()
        .unwrap();

    let mut generator = generator();
    let document = compile(&mut generator, &workflow);
    let steps = main_steps(&document);

    let fanout = &step(steps, "m_fanout")["parallel"];
    assert_eq!(fanout["shared"], json!(["m_results"]));
    assert_eq!(fanout["concurrency_limit"], 4);
    assert_eq!(fanout["for"]["in"], "${payload.xs}");
    assert_eq!(
        step(steps, "m_writeback"),
        &json!({ "assign": [ { "payload.xs": "${m_list}" } ], "next": "workflow_end" })
    );

    assert!(generator.pending_maps().is_empty());
    assert!(generator.generate_maps().unwrap().is_empty());
}

#[test]
fn test_nested_map_is_lifted_into_its_own_document() {
    let body = WorkflowBuilder::new("first")
        .task("first", "inc", Some("second"))
        .task("second", "double", None)
        .build()
        .unwrap();
    let workflow = WorkflowBuilder::new("m")
        .map_workflow("m", body, "items")
        .common_params("scale")
        .next("done")
        .build()
        .task("done", "inc", None)
        .build()
        .unwrap();

    let mut generator = generator();
    let document = compile(&mut generator, &workflow);
    let steps = main_steps(&document);

    let call = step(steps, "m_call");
    assert_eq!(call["call"], "experimental.executions.map");
    assert_eq!(call["args"]["workflow_id"], "flow_m");
    assert_eq!(call["args"]["arguments"], "${m_elements}");
    assert_eq!(step(steps, "m_writeback")["next"], "done");

    let collect = &step(steps, "m_collect")["for"];
    let item = &collect["steps"][0]["m_append"]["assign"][0]["m_item"];
    assert_eq!(
        item,
        &json!({
            "payload": { "array_element": "${m_element}", "scale": "${payload.scale}" },
            "request_id": "${request_id}"
        })
    );

    let lifted = generator.generate_maps().unwrap();
    assert_eq!(lifted.len(), 1);
    assert_eq!(lifted[0].0, "flow_m");
    let nested: Value = serde_yaml::from_str(&lifted[0].1).unwrap();
    assert_eq!(step(main_steps(&nested), "init")["next"], "first");

    // The side table is drained by the second pass.
    assert!(generator.generate_maps().unwrap().is_empty());
}

#[test]
fn test_lifted_document_count_matches_nested_maps() {
    let leaf = WorkflowBuilder::new("l").task("l", "inc", None).build().unwrap();
    let inner = WorkflowBuilder::new("inner_map")
        .map_workflow("inner_map", leaf.clone(), "ys")
        .build()
        .build()
        .unwrap();

    let workflow = WorkflowBuilder::new("one")
        .map_workflow("one", leaf, "xs")
        .next("two")
        .build()
        .map_workflow("two", inner, "groups")
        .next("three")
        .build()
        .map("three", "inc", "zs")
        .build()
        .build()
        .unwrap();

    let mut generator = generator();
    generator.generate(&workflow).unwrap();
    assert_eq!(generator.pending_maps(), vec!["flow_one", "flow_two"]);

    let lifted = generator.generate_maps().unwrap();
    let ids: Vec<&str> = lifted.iter().map(|(id, _)| id.as_str()).collect();
    // `inner_map` sits inside `two`'s body and is lifted from there.
    assert_eq!(ids, vec!["flow_one", "flow_two", "flow_two_inner_map"]);
}

#[test]
fn test_loop_is_sequential_for() {
    let workflow = WorkflowBuilder::new("l")
        .loop_over("l", "notify", "users", Some("t"))
        .task("t", "inc", None)
        .build()
        .unwrap();

    let document = compile(&mut generator(), &workflow);
    let steps = main_steps(&document);

    let each = &step(steps, "l")["for"];
    assert_eq!(each["value"], "l_element");
    assert_eq!(each["in"], "${payload.users}");
    assert_eq!(each["steps"][0]["l_invoke"]["args"]["body"]["payload"], "${l_element}");
    assert_eq!(step(steps, "l_done"), &json!({ "next": "t" }));
}

#[test]
fn test_repeat_unrolls() {
    let workflow = WorkflowBuilder::new("r").repeat("r", "inc", 2, None).build().unwrap();

    let document = compile(&mut generator(), &workflow);
    assert_eq!(
        step_names(main_steps(&document)),
        vec!["init", "r", "r_result", "r_1", "r_1_result", "workflow_end"]
    );
}

#[test]
fn test_parallel_branches_assign_their_slots() {
    let workflow = Workflow::from_value(json!({
        "root": "p",
        "states": {
            "p": {
                "type": "parallel",
                "funcs": [
                    { "name": "A", "root": "a", "states": { "a": { "type": "task", "func_name": "inc" } } },
                    { "root": "b", "states": { "b": { "type": "map", "func_name": "fb", "array": "xs" } } }
                ],
                "next": "after"
            },
            "after": { "type": "task", "func_name": "double" }
        }
    }))
    .unwrap();

    let document = compile(&mut generator(), &workflow);
    let steps = main_steps(&document);

    assert_eq!(
        step(steps, "p"),
        &json!({ "assign": [ { "p_A": null }, { "p_fb": null } ] })
    );

    let parallel = &step(steps, "p_branches")["parallel"];
    assert_eq!(parallel["shared"], json!(["p_A", "p_fb"]));

    let branch_a = parallel["branches"][0]["p_A"]["steps"].as_array().unwrap();
    assert_eq!(
        step(branch_a, "p_A_start"),
        &json!({ "assign": [ { "p_A_payload": "${payload}" } ], "next": "p_A_a" })
    );
    assert_eq!(step(branch_a, "p_A_a")["result"], "p_A_payload");
    assert_eq!(step(branch_a, "p_A_a_result")["next"], "p_A_done");
    assert_eq!(
        step(branch_a, "p_A_done"),
        &json!({ "assign": [ { "p_A": "${p_A_payload}" } ] })
    );

    let branch_b = parallel["branches"][1]["p_fb"]["steps"].as_array().unwrap();
    assert_eq!(step(branch_b, "p_fb_b_writeback")["next"], "p_fb_done");
    assert_eq!(
        step(branch_b, "p_fb_done"),
        &json!({ "assign": [ { "p_fb": "${p_fb_payload.xs}" } ] })
    );
    // A one-element result is unwrapped to the bare value.
    assert_eq!(
        step(branch_b, "p_fb_unwrap"),
        &json!({
            "switch": [{
                "condition": "${len(p_fb) == 1}",
                "steps": [ { "p_fb_single": { "assign": [ { "p_fb": "${p_fb[0]}" } ] } } ]
            }]
        })
    );
    assert!(!step_names(parallel["branches"][0]["p_A"]["steps"].as_array().unwrap()).contains(&"p_A_unwrap".to_string()));

    assert_eq!(
        step(steps, "p_merge"),
        &json!({
            "assign": [ { "payload": { "A": "${p_A}", "fb": "${p_fb}" } } ],
            "next": "after"
        })
    );
}

#[test]
fn test_map_branch_with_continuation_is_lifted() {
    let workflow = Workflow::from_value(json!({
        "root": "p",
        "states": {
            "p": {
                "type": "parallel",
                "funcs": [{
                    "root": "m",
                    "states": {
                        "m": { "type": "map", "func_name": "inc", "array": "xs", "next": "t" },
                        "t": { "type": "task", "func_name": "double" }
                    }
                }]
            }
        }
    }))
    .unwrap();

    let mut generator = generator();
    compile(&mut generator, &workflow);
    assert_eq!(generator.pending_maps(), vec!["flow_p_inc_m"]);

    let lifted = generator.generate_maps().unwrap();
    let body: Value = serde_yaml::from_str(&lifted[0].1).unwrap();
    let names = step_names(main_steps(&body));
    assert_eq!(names, vec!["init", "m", "m_result", "t", "t_result", "workflow_end"]);
}

#[test]
fn test_names_colliding_after_sanitizing_fail() {
    let workflow = WorkflowBuilder::new("a-b")
        .task("a-b", "inc", Some("a_b"))
        .task("a_b", "double", None)
        .build()
        .unwrap();

    let err = generator().generate(&workflow).unwrap_err();
    assert!(matches!(
        err,
        CompilationError::Invalid { ref state, ref reason, .. } if state == "a_b" && reason.contains("'a_b'")
    ));
}

#[test]
fn test_state_named_like_a_generated_step_fails() {
    let init = WorkflowBuilder::new("init").task("init", "inc", None).build().unwrap();
    assert!(matches!(
        generator().generate(&init).unwrap_err(),
        CompilationError::Invalid { ref state, .. } if state == "init"
    ));

    let shadowed = WorkflowBuilder::new("a")
        .task("a", "inc", Some("a_result"))
        .task("a_result", "double", None)
        .build()
        .unwrap();
    assert!(matches!(
        generator().generate(&shadowed).unwrap_err(),
        CompilationError::Invalid { ref state, .. } if state == "a_result"
    ));
}

#[test]
fn test_unresolved_endpoint_fails() {
    let workflow = WorkflowBuilder::new("a").task("a", "ghost", None).build().unwrap();
    let mut generator = WorkflowsGenerator::new(Arc::new(TemplateResolver::fixed(HashMap::new())), "flow");

    let err = generator.generate(&workflow).unwrap_err();
    assert!(matches!(err, CompilationError::Unresolved(ref name) if name == "ghost"));
}
