use crate::compiler::{Fragment, Generator, resolve};
use crate::dsl::{Branch, Case, Comparison, Loop, Map, MapBody, Parallel, State, Switch, Task, Workflow};
use crate::error::CompilationError;
use crate::resolver::ResourceResolver;
use serde_json::{Value, json};
use std::sync::Arc;

const BACKEND: &str = "step-functions";

type Object = serde_json::Map<String, Value>;

/// Emits Amazon States Language: one state per FSM state, assembled as
/// `{StartAt, States}`.
pub struct StepFunctionsGenerator {
    resolver: Arc<dyn ResourceResolver>,
}

impl StepFunctionsGenerator {
    pub fn new(resolver: Arc<dyn ResourceResolver>) -> Self {
        Self { resolver }
    }

    fn task_state(&self, func_name: &str, next: Option<&str>) -> Result<Object, CompilationError> {
        let mut state = Object::new();
        state.insert("Type".into(), json!("Task"));
        state.insert("Resource".into(), json!(resolve(self.resolver.as_ref(), func_name)?));
        transition(&mut state, next);
        Ok(state)
    }

    /// Single-task document used as the iterator of activity-bodied maps.
    fn single_task_document(&self, func_name: &str) -> Result<Value, CompilationError> {
        let task = self.task_state(func_name, None)?;
        Ok(json!({
            "StartAt": func_name,
            "States": { func_name: task },
        }))
    }

    fn iterator(&mut self, body: &MapBody) -> Result<Value, CompilationError> {
        match body {
            MapBody::Activity(func_name) => self.single_task_document(func_name),
            MapBody::Workflow(workflow) => self.encode_workflow(workflow),
        }
    }

    /// The parts of a Map state shared by Map and Map-rooted branches.
    fn map_state(&self, map: &Map, iterator: Value) -> Object {
        let mut state = Object::new();
        state.insert("Type".into(), json!("Map"));
        state.insert("ItemsPath".into(), json!(json_path(&map.array)));

        let params = map.common_params();
        if !params.is_empty() {
            let mut parameters = Object::new();
            parameters.insert("array_element.$".into(), json!("$$.Map.Item.Value"));
            for param in params {
                parameters.insert(format!("{param}.$"), json!(json_path(param)));
            }
            state.insert("Parameters".into(), Value::Object(parameters));
        }

        state.insert("Iterator".into(), iterator);
        if let Some(limit) = map.max_concurrency {
            state.insert("MaxConcurrency".into(), json!(limit));
        }
        state
    }

    fn choice(&self, name: &str, case: &Case) -> Result<Value, CompilationError> {
        let mut choice = Object::new();
        choice.insert("Variable".into(), json!(json_path(&case.var)));

        if case.val.is_null() && case.op == Comparison::Equals {
            choice.insert("IsNull".into(), json!(true));
            choice.insert("Next".into(), json!(case.next));
            return Ok(Value::Object(choice));
        }

        let comparator = match &case.val {
            Value::Number(_) => format!("Numeric{}", case.op.name()),
            Value::String(_) => format!("String{}", case.op.name()),
            Value::Bool(_) if case.op == Comparison::Equals => "BooleanEquals".to_string(),
            other => {
                return Err(CompilationError::Invalid {
                    backend: BACKEND,
                    state: name.to_string(),
                    reason: format!("no comparator for {} {}", case.op.symbol(), other),
                });
            }
        };
        choice.insert(comparator, case.val.clone());
        choice.insert("Next".into(), json!(case.next));
        Ok(Value::Object(choice))
    }

    fn branch_document(&mut self, name: &str, branch: &Branch) -> Result<Value, CompilationError> {
        let root = branch.workflow.root.as_str();
        match branch.root_state() {
            Some(State::Task(_)) => self.encode_workflow(&branch.workflow),
            Some(State::Map(map)) => {
                let func_name = map.func_name().ok_or_else(|| unsupported_branch(name, "map"))?;
                // Each element runs the rest of the branch; the branch output is
                // the array of element results.
                let iterator = match branch.element_workflow() {
                    Some(element) => self.encode_workflow(&element)?,
                    None => self.single_task_document(func_name)?,
                };
                let shape = format!("{root}_shape");
                let single = format!("{root}_single");
                let list = format!("{root}_list");
                let mut state = self.map_state(map, iterator);
                transition(&mut state, Some(&shape));
                // A single element contributes its bare result, anything else the list.
                Ok(json!({
                    "StartAt": root,
                    "States": {
                        root: state,
                        shape: {
                            "Type": "Choice",
                            "Choices": [{
                                "And": [
                                    { "Variable": "$[0]", "IsPresent": true },
                                    { "Variable": "$[1]", "IsPresent": false },
                                ],
                                "Next": single,
                            }],
                            "Default": list,
                        },
                        single: { "Type": "Pass", "InputPath": "$[0]", "End": true },
                        list: { "Type": "Succeed" },
                    },
                }))
            }
            Some(other) => Err(unsupported_branch(name, other.kind())),
            None => Err(CompilationError::Invalid {
                backend: BACKEND,
                state: name.to_string(),
                reason: format!("branch root '{root}' is not declared"),
            }),
        }
    }
}

impl Generator for StepFunctionsGenerator {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn encode_task(&mut self, name: &str, state: &Task) -> Result<Vec<Fragment>, CompilationError> {
        let task = self.task_state(&state.func_name, state.next.as_deref())?;
        Ok(vec![Fragment::new(name, Value::Object(task))])
    }

    fn encode_switch(&mut self, name: &str, state: &Switch) -> Result<Vec<Fragment>, CompilationError> {
        let choices = state
            .cases
            .iter()
            .map(|case| self.choice(name, case))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fragments = Vec::new();
        // A Choice state without a match fails the execution; fall through to a
        // Succeed state instead so a missing default just ends the workflow.
        let default = match &state.default {
            Some(default) => default.clone(),
            None => {
                let end = format!("{name}_no_match");
                fragments.push(Fragment::new(end.clone(), json!({ "Type": "Succeed" })));
                end
            }
        };

        fragments.insert(
            0,
            Fragment::new(
                name,
                json!({
                    "Type": "Choice",
                    "Choices": choices,
                    "Default": default,
                }),
            ),
        );
        Ok(fragments)
    }

    fn encode_map(&mut self, name: &str, state: &Map) -> Result<Vec<Fragment>, CompilationError> {
        let iterator = self.iterator(&state.body)?;
        let mut map = self.map_state(state, iterator);
        map.insert("ResultPath".into(), json!(json_path(&state.array)));
        transition(&mut map, state.next.as_deref());
        Ok(vec![Fragment::new(name, Value::Object(map))])
    }

    fn encode_loop(&mut self, name: &str, state: &Loop) -> Result<Vec<Fragment>, CompilationError> {
        let iterator = self.single_task_document(&state.func_name)?;
        let mut map = Object::new();
        map.insert("Type".into(), json!("Map"));
        map.insert("ItemsPath".into(), json!(json_path(&state.array)));
        map.insert("Iterator".into(), iterator);
        map.insert("MaxConcurrency".into(), json!(1));
        // Null result path: iteration results are discarded.
        map.insert("ResultPath".into(), Value::Null);
        transition(&mut map, state.next.as_deref());
        Ok(vec![Fragment::new(name, Value::Object(map))])
    }

    fn encode_parallel(&mut self, name: &str, state: &Parallel) -> Result<Vec<Fragment>, CompilationError> {
        let mut branches = Vec::with_capacity(state.funcs.len());
        let mut selector = Object::new();
        for (i, branch) in state.funcs.iter().enumerate() {
            branches.push(self.branch_document(name, branch)?);
            selector.insert(format!("{}.$", branch.key()), json!(format!("$[{i}]")));
        }

        let mut parallel = Object::new();
        parallel.insert("Type".into(), json!("Parallel"));
        parallel.insert("Branches".into(), Value::Array(branches));
        parallel.insert("ResultSelector".into(), Value::Object(selector));
        transition(&mut parallel, state.next.as_deref());
        Ok(vec![Fragment::new(name, Value::Object(parallel))])
    }

    fn postprocess(&mut self, workflow: &Workflow, fragments: Vec<Fragment>) -> Result<Value, CompilationError> {
        let states: Object = fragments
            .into_iter()
            .map(|fragment| (fragment.name, fragment.body))
            .collect();
        Ok(json!({
            "StartAt": workflow.root,
            "States": states,
        }))
    }
}

fn json_path(path: &str) -> String {
    format!("$.{path}")
}

fn transition(state: &mut Object, next: Option<&str>) {
    match next {
        Some(next) => state.insert("Next".into(), json!(next)),
        None => state.insert("End".into(), json!(true)),
    };
}

fn unsupported_branch(state: &str, kind: &'static str) -> CompilationError {
    CompilationError::Unsupported {
        backend: BACKEND,
        kind,
        state: state.to_string(),
    }
}
