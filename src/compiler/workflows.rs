use crate::compiler::{Fragment, Generator, resolve};
use crate::dsl::{Branch, Loop, Map, MapBody, Parallel, State, Switch, Task, Workflow};
use crate::error::CompilationError;
use crate::resolver::ResourceResolver;
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

const BACKEND: &str = "workflows";
const PAYLOAD: &str = "payload";
const END: &str = "workflow_end";

/// Emits declarative workflow YAML: a `main` block whose steps call each
/// activity's HTTP trigger and thread the payload through one variable.
///
/// Map states with a nested body are not inlined. They call a separate
/// workflow by id; the bodies are collected while encoding and emitted as
/// extra documents by [`WorkflowsGenerator::generate_maps`].
pub struct WorkflowsGenerator {
    resolver: Arc<dyn ResourceResolver>,
    prefix: String,
    payload_var: String,
    end_target: String,
    scope: Option<String>,
    map_bodies: IndexMap<String, Workflow>,
}

impl WorkflowsGenerator {
    pub fn new(resolver: Arc<dyn ResourceResolver>, prefix: impl Into<String>) -> Self {
        Self {
            resolver,
            prefix: prefix.into(),
            payload_var: PAYLOAD.to_string(),
            end_target: END.to_string(),
            scope: None,
            map_bodies: IndexMap::new(),
        }
    }

    /// Ids of the nested workflows registered so far, in encounter order.
    pub fn pending_maps(&self) -> Vec<&str> {
        self.map_bodies.keys().map(String::as_str).collect()
    }

    /// Second generation pass: one `(workflow id, YAML)` document per lifted
    /// Map body, including bodies lifted from inside other bodies.
    pub fn generate_maps(&mut self) -> Result<Vec<(String, String)>, CompilationError> {
        let mut documents = Vec::new();
        for (id, body) in std::mem::take(&mut self.map_bodies) {
            debug!(workflow_id = %id, "generating nested map workflow");
            let mut generator = WorkflowsGenerator::new(self.resolver.clone(), id.clone());
            let document = generator.generate(&body)?;
            documents.push((id, document));
            documents.extend(generator.generate_maps()?);
        }
        Ok(documents)
    }

    /// Step or variable name, qualified by the enclosing parallel branch.
    fn step(&self, name: &str) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}_{}", ident(name)),
            None => ident(name),
        }
    }

    fn target(&self, next: Option<&str>) -> String {
        match next {
            Some(next) => self.step(next),
            None => self.end_target.clone(),
        }
    }

    fn payload_at(&self, path: &str) -> String {
        format!("{}.{path}", self.payload_var)
    }

    fn url(&self, activity: &str) -> Result<String, CompilationError> {
        resolve(self.resolver.as_ref(), activity)
    }

    /// An `http.post` step sending `{request_id, payload}` to the activity.
    fn http_call(&self, activity: &str, payload: Value, result: &str) -> Result<Value, CompilationError> {
        Ok(json!({
            "call": "http.post",
            "args": {
                "url": self.url(activity)?,
                "body": {
                    "request_id": expr("request_id"),
                    "payload": payload,
                },
            },
            "result": result,
        }))
    }

    /// Per-element call payload: the element itself, or the element plus the
    /// shared parameters.
    fn element_payload(&self, map: &Map, element: &str) -> Value {
        let params = map.common_params();
        if params.is_empty() {
            return json!(expr(element));
        }
        let mut obj = serde_json::Map::new();
        obj.insert("array_element".into(), json!(expr(element)));
        for param in params {
            obj.insert(param.to_string(), json!(expr(&self.payload_at(param))));
        }
        Value::Object(obj)
    }

    fn lifted_map(&mut self, name: &str, map: &Map, body: &Workflow) -> Vec<Fragment> {
        let id = format!("{}_{}", self.prefix, self.step(name));
        self.map_bodies.insert(id.clone(), body.clone());

        let elements = self.step(&format!("{name}_elements"));
        let item = self.step(&format!("{name}_item"));
        let results = self.step(&format!("{name}_results"));
        let element = self.step(&format!("{name}_element"));

        let mut item_body = serde_json::Map::new();
        item_body.insert("payload".into(), self.element_payload(map, &element));
        item_body.insert("request_id".into(), json!(expr("request_id")));

        vec![
            Fragment::new(
                self.step(name),
                json!({ "assign": [ { elements.clone(): [] } ] }),
            ),
            Fragment::new(
                self.step(&format!("{name}_collect")),
                json!({
                    "for": {
                        "value": element,
                        "in": expr(&self.payload_at(&map.array)),
                        "steps": [
                            {
                                self.step(&format!("{name}_append")): {
                                    "assign": [
                                        { item.clone(): Value::Object(item_body) },
                                        { elements.clone(): expr(&format!("list.concat({elements}, {item})")) },
                                    ],
                                },
                            },
                        ],
                    },
                }),
            ),
            Fragment::new(
                self.step(&format!("{name}_call")),
                json!({
                    "call": "experimental.executions.map",
                    "args": {
                        "workflow_id": id,
                        "arguments": expr(&elements),
                    },
                    "result": results,
                }),
            ),
            Fragment::new(
                self.step(&format!("{name}_writeback")),
                json!({
                    "assign": [ { self.payload_at(&map.array): expr(&results) } ],
                    "next": self.target(map.next.as_deref()),
                }),
            ),
        ]
    }

    fn inline_map(&self, name: &str, map: &Map, activity: &str) -> Result<Vec<Fragment>, CompilationError> {
        let results = self.step(&format!("{name}_results"));
        let list = self.step(&format!("{name}_list"));
        let element = self.step(&format!("{name}_element"));
        let index = self.step(&format!("{name}_index"));
        let response = self.step(&format!("{name}_response"));
        let array = self.payload_at(&map.array);

        let mut fanout = serde_json::Map::new();
        fanout.insert("shared".into(), json!([results]));
        if let Some(limit) = map.max_concurrency {
            fanout.insert("concurrency_limit".into(), json!(limit));
        }
        fanout.insert(
            "for".into(),
            json!({
                "value": element,
                "index": index,
                "in": expr(&array),
                "steps": [
                    { self.step(&format!("{name}_invoke")):
                        self.http_call(activity, self.element_payload(map, &element), &response)? },
                    { self.step(&format!("{name}_store")): {
                        "assign": [ { format!("{results}[string({index})]"): expr(&format!("{response}.body")) } ],
                    } },
                ],
            }),
        );

        // Branch results land keyed by index; rebuild the list in order.
        let position = self.step(&format!("{name}_position"));
        Ok(vec![
            Fragment::new(
                self.step(name),
                json!({ "assign": [ { results.clone(): {} }, { list.clone(): [] } ] }),
            ),
            Fragment::new(
                self.step(&format!("{name}_fanout")),
                json!({ "parallel": Value::Object(fanout) }),
            ),
            Fragment::new(
                self.step(&format!("{name}_gather")),
                json!({
                    "for": {
                        "value": position,
                        "range": [0, expr(&format!("len({array}) - 1"))],
                        "steps": [
                            { self.step(&format!("{name}_append")): {
                                "assign": [ { list.clone(): expr(&format!("list.concat({list}, {results}[string({position})])")) } ],
                            } },
                        ],
                    },
                }),
            ),
            Fragment::new(
                self.step(&format!("{name}_writeback")),
                json!({
                    "assign": [ { array: expr(&list) } ],
                    "next": self.target(map.next.as_deref()),
                }),
            ),
        ])
    }

    /// Encodes one branch with its own payload variable and end step, so that
    /// the branch's last value is written into its shared slot.
    fn branch_steps(&mut self, state: &str, branch: &Branch, slot: &str) -> Result<Value, CompilationError> {
        let branch_payload = format!("{slot}_payload");
        let done = format!("{slot}_done");
        let start_name = format!("{slot}_start");
        let start = json!({
            start_name.clone(): {
                "assign": [ { branch_payload.clone(): expr(&self.payload_var) } ],
                "next": format!("{slot}_{}", ident(&branch.workflow.root)),
            },
        });

        let parent = (
            std::mem::replace(&mut self.payload_var, branch_payload.clone()),
            std::mem::replace(&mut self.end_target, done.clone()),
            std::mem::replace(&mut self.scope, Some(slot.to_string())),
        );
        let encoded = self.encode_branch(state, branch);
        (self.payload_var, self.end_target, self.scope) = parent;
        let (fragments, array) = encoded?;

        let unwrap = format!("{slot}_unwrap");
        if let Some(taken) = fragments.iter().find(|f| [&start_name, &done, &unwrap].contains(&&f.name)) {
            return Err(CompilationError::Invalid {
                backend: BACKEND,
                state: state.to_string(),
                reason: format!("generated name '{}' is already taken", taken.name),
            });
        }

        let mut steps = vec![start];
        steps.extend(fragments.into_iter().map(step_entry));
        match array {
            Some(array) => {
                // A single element contributes its bare result, anything else the list.
                steps.push(json!({ done: { "assign": [ { slot: expr(&format!("{branch_payload}.{array}")) } ] } }));
                steps.push(json!({
                    unwrap: {
                        "switch": [{
                            "condition": expr(&format!("len({slot}) == 1")),
                            "steps": [ { format!("{slot}_single"): { "assign": [ { slot: expr(&format!("{slot}[0]")) } ] } } ],
                        }],
                    },
                }));
            }
            None => steps.push(json!({ done: { "assign": [ { slot: expr(&branch_payload) } ] } })),
        }

        Ok(json!({ slot: { "steps": steps } }))
    }

    /// The branch's fragments, plus the array path whose value is the branch
    /// result when the branch is rooted at a map.
    fn encode_branch(&mut self, state: &str, branch: &Branch) -> Result<(Vec<Fragment>, Option<String>), CompilationError> {
        let root = branch.workflow.root.as_str();
        match branch.root_state() {
            Some(State::Task(_)) => Ok((self.encode_states(&branch.workflow)?, None)),
            Some(State::Map(map)) => {
                let fragments = match branch.element_workflow() {
                    Some(element) => {
                        let lifted = Map {
                            next: None,
                            ..map.clone()
                        };
                        self.lifted_map(root, &lifted, &element)
                    }
                    None => self.encode_map(root, map)?,
                };
                Ok((fragments, Some(map.array.clone())))
            }
            Some(other) => Err(CompilationError::Unsupported {
                backend: BACKEND,
                kind: other.kind(),
                state: state.to_string(),
            }),
            None => Err(CompilationError::Invalid {
                backend: BACKEND,
                state: state.to_string(),
                reason: format!("branch root '{root}' is not declared"),
            }),
        }
    }
}

impl Generator for WorkflowsGenerator {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn encode_task(&mut self, name: &str, state: &Task) -> Result<Vec<Fragment>, CompilationError> {
        let payload = self.payload_var.clone();
        Ok(vec![
            Fragment::new(
                self.step(name),
                self.http_call(&state.func_name, json!(expr(&payload)), &payload)?,
            ),
            Fragment::new(
                self.step(&format!("{name}_result")),
                json!({
                    "assign": [ { payload.clone(): expr(&format!("{payload}.body")) } ],
                    "next": self.target(state.next.as_deref()),
                }),
            ),
        ])
    }

    fn encode_switch(&mut self, name: &str, state: &Switch) -> Result<Vec<Fragment>, CompilationError> {
        let mut conditions = Vec::with_capacity(state.cases.len());
        for case in &state.cases {
            let value = serde_json::to_string(&case.val).map_err(|e| CompilationError::Export(e.to_string()))?;
            conditions.push(json!({
                "condition": expr(&format!("{} {} {value}", self.payload_at(&case.var), case.op.symbol())),
                "next": self.step(&case.next),
            }));
        }
        Ok(vec![Fragment::new(
            self.step(name),
            json!({
                "switch": conditions,
                "next": self.target(state.default.as_deref()),
            }),
        )])
    }

    fn encode_map(&mut self, name: &str, state: &Map) -> Result<Vec<Fragment>, CompilationError> {
        match &state.body {
            MapBody::Activity(activity) => self.inline_map(name, state, activity),
            MapBody::Workflow(body) => Ok(self.lifted_map(name, state, body)),
        }
    }

    fn encode_loop(&mut self, name: &str, state: &Loop) -> Result<Vec<Fragment>, CompilationError> {
        let element = self.step(&format!("{name}_element"));
        let response = self.step(&format!("{name}_response"));
        Ok(vec![
            Fragment::new(
                self.step(name),
                json!({
                    "for": {
                        "value": element,
                        "in": expr(&self.payload_at(&state.array)),
                        "steps": [
                            { self.step(&format!("{name}_invoke")):
                                self.http_call(&state.func_name, json!(expr(&element)), &response)? },
                        ],
                    },
                }),
            ),
            Fragment::new(
                self.step(&format!("{name}_done")),
                json!({ "next": self.target(state.next.as_deref()) }),
            ),
        ])
    }

    fn encode_parallel(&mut self, name: &str, state: &Parallel) -> Result<Vec<Fragment>, CompilationError> {
        let slots: Vec<String> = state
            .funcs
            .iter()
            .map(|branch| self.step(&format!("{name}_{}", branch.key())))
            .collect();

        let mut branches = Vec::with_capacity(state.funcs.len());
        for (branch, slot) in state.funcs.iter().zip(&slots) {
            branches.push(self.branch_steps(name, branch, slot)?);
        }

        let mut merged = serde_json::Map::new();
        for (branch, slot) in state.funcs.iter().zip(&slots) {
            merged.insert(branch.key().to_string(), json!(expr(slot)));
        }

        let init: Vec<Value> = slots.iter().map(|slot| json!({ slot.clone(): Value::Null })).collect();
        Ok(vec![
            Fragment::new(self.step(name), json!({ "assign": init })),
            Fragment::new(
                self.step(&format!("{name}_branches")),
                json!({
                    "parallel": {
                        "shared": slots,
                        "branches": branches,
                    },
                }),
            ),
            Fragment::new(
                self.step(&format!("{name}_merge")),
                json!({
                    "assign": [ { self.payload_var.clone(): Value::Object(merged) } ],
                    "next": self.target(state.next.as_deref()),
                }),
            ),
        ])
    }

    fn reserved_names(&self) -> &'static [&'static str] {
        &["init", END]
    }

    fn postprocess(&mut self, workflow: &Workflow, fragments: Vec<Fragment>) -> Result<Value, CompilationError> {
        let mut steps = Vec::with_capacity(fragments.len() + 2);
        steps.push(json!({
            "init": {
                "assign": [
                    { PAYLOAD: expr("input.payload") },
                    { "request_id": expr("input.request_id") },
                ],
                "next": self.step(&workflow.root),
            },
        }));
        steps.extend(fragments.into_iter().map(step_entry));
        steps.push(json!({ END: { "return": expr(PAYLOAD) } }));

        Ok(json!({
            "main": {
                "params": ["input"],
                "steps": steps,
            },
        }))
    }

    fn export(&self, document: &Value) -> Result<String, CompilationError> {
        serde_yaml::to_string(document).map_err(|e| CompilationError::Export(e.to_string()))
    }
}

fn step_entry(fragment: Fragment) -> Value {
    let mut entry = serde_json::Map::new();
    entry.insert(fragment.name, fragment.body);
    Value::Object(entry)
}

fn expr(inner: &str) -> String {
    format!("${{{inner}}}")
}

/// Step and variable names only allow letters, digits and underscores.
fn ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
