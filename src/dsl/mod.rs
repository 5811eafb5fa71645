pub mod builder;

use crate::error::DefinitionError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A workflow definition: a root state name plus the states by name.
///
/// State order is kept as declared so generated documents follow the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub root: String,
    pub states: IndexMap<String, State>,
}

/// One step of a workflow. The state's name is its key in `Workflow::states`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum State {
    Task(Task),
    Switch(Switch),
    Map(Map),
    Repeat(Repeat),
    Loop(Loop),
    Parallel(Parallel),
}

/// Invoke one activity; the result replaces the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub func_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Ordered conditional branching on payload values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Switch {
    pub cases: Vec<Case>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Case {
    pub var: String,
    pub op: Comparison,
    pub val: Value,
    pub next: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Comparison {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanEquals,
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = ">=")]
    GreaterThanEquals,
    #[serde(rename = ">")]
    GreaterThan,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::LessThan => "<",
            Comparison::LessThanEquals => "<=",
            Comparison::Equals => "==",
            Comparison::GreaterThanEquals => ">=",
            Comparison::GreaterThan => ">",
        }
    }

    /// Operator name as used by Step Functions comparators.
    pub fn name(&self) -> &'static str {
        match self {
            Comparison::LessThan => "LessThan",
            Comparison::LessThanEquals => "LessThanEquals",
            Comparison::Equals => "Equals",
            Comparison::GreaterThanEquals => "GreaterThanEquals",
            Comparison::GreaterThan => "GreaterThan",
        }
    }
}

/// Data-parallel application of a body to every element of an array field.
///
/// The body is either a single activity (`func_name`) or a nested workflow
/// (`body: {root, states}`) run once per element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawMap", into = "RawMap")]
pub struct Map {
    pub body: MapBody,
    pub array: String,
    pub common_params: Option<String>,
    pub max_concurrency: Option<usize>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapBody {
    Activity(String),
    Workflow(Box<Workflow>),
}

impl Map {
    /// The comma-separated `common_params` as individual paths.
    pub fn common_params(&self) -> Vec<&str> {
        self.common_params
            .as_deref()
            .map(|params| {
                params
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Activity name when the body is a single activity.
    pub fn func_name(&self) -> Option<&str> {
        match &self.body {
            MapBody::Activity(name) => Some(name),
            MapBody::Workflow(_) => None,
        }
    }

    /// True when the body is more than a single activity call.
    pub fn has_nested_body(&self) -> bool {
        matches!(self.body, MapBody::Workflow(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    func_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Workflow>,
    array: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    common_params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<String>,
}

impl TryFrom<RawMap> for Map {
    type Error = String;

    fn try_from(raw: RawMap) -> Result<Self, Self::Error> {
        let body = match (raw.func_name, raw.body) {
            (Some(func_name), None) => MapBody::Activity(func_name),
            (None, Some(body)) => MapBody::Workflow(Box::new(body)),
            (Some(_), Some(_)) => {
                return Err("map state declares both `func_name` and `body`".to_string());
            }
            (None, None) => return Err("map state needs `func_name` or `body`".to_string()),
        };
        Ok(Map {
            body,
            array: raw.array,
            common_params: raw.common_params,
            max_concurrency: raw.max_concurrency,
            next: raw.next,
        })
    }
}

impl From<Map> for RawMap {
    fn from(map: Map) -> Self {
        let (func_name, body) = match map.body {
            MapBody::Activity(name) => (Some(name), None),
            MapBody::Workflow(workflow) => (None, Some(*workflow)),
        };
        RawMap {
            func_name,
            body,
            array: map.array,
            common_params: map.common_params,
            max_concurrency: map.max_concurrency,
            next: map.next,
        }
    }
}

/// Invoke one activity `count` times, feeding each result into the next call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repeat {
    pub func_name: String,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Invoke one activity per array element, sequentially. Results are dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Loop {
    pub func_name: String,
    pub array: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Concurrent execution of independent branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parallel {
    pub funcs: Vec<Branch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// A sub-workflow inside a Parallel state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub workflow: Workflow,
}

impl Branch {
    pub fn root_state(&self) -> Option<&State> {
        self.workflow.states.get(&self.workflow.root)
    }

    /// Key under which this branch's result lands in the merged payload:
    /// the explicit name, else the first state's activity, else the root name.
    pub fn key(&self) -> &str {
        if let Some(name) = &self.name {
            return name;
        }
        match self.root_state() {
            Some(State::Task(task)) => &task.func_name,
            Some(State::Map(map)) => map.func_name().unwrap_or(&self.workflow.root),
            _ => &self.workflow.root,
        }
    }

    /// For a branch rooted at a map with a successor, the workflow each
    /// element runs through: the map's activity as a task, then the rest of
    /// the branch. `None` for any other branch shape.
    pub fn element_workflow(&self) -> Option<Workflow> {
        match self.root_state() {
            Some(State::Map(map)) if map.next.is_some() => {
                let func_name = map.func_name()?;
                let mut workflow = self.workflow.clone();
                workflow.states.insert(
                    workflow.root.clone(),
                    State::Task(Task {
                        func_name: func_name.to_string(),
                        next: map.next.clone(),
                    }),
                );
                Some(workflow)
            }
            _ => None,
        }
    }
}

impl State {
    pub fn kind(&self) -> &'static str {
        match self {
            State::Task(_) => "task",
            State::Switch(_) => "switch",
            State::Map(_) => "map",
            State::Repeat(_) => "repeat",
            State::Loop(_) => "loop",
            State::Parallel(_) => "parallel",
        }
    }

    /// The unconditional successor, if the state has one.
    pub fn next(&self) -> Option<&str> {
        match self {
            State::Task(s) => s.next.as_deref(),
            State::Switch(_) => None,
            State::Map(s) => s.next.as_deref(),
            State::Repeat(s) => s.next.as_deref(),
            State::Loop(s) => s.next.as_deref(),
            State::Parallel(s) => s.next.as_deref(),
        }
    }

    /// Every state name this state may transition to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            State::Switch(s) => s
                .cases
                .iter()
                .map(|c| c.next.as_str())
                .chain(s.default.as_deref())
                .collect(),
            other => other.next().into_iter().collect(),
        }
    }
}

impl Workflow {
    /// Parses and validates a JSON definition.
    pub fn from_json(content: &str) -> Result<Self, DefinitionError> {
        let workflow: Workflow = serde_json::from_str(content)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Parses and validates a YAML definition.
    pub fn from_yaml(content: &str) -> Result<Self, DefinitionError> {
        let workflow: Workflow = serde_yaml::from_str(content)?;
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn from_value(value: Value) -> Result<Self, DefinitionError> {
        let workflow: Workflow = serde_json::from_value(value)?;
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn to_json(&self) -> Result<String, DefinitionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn get(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    /// Checks that every reference resolves and every state is well formed.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !self.states.contains_key(&self.root) {
            return Err(DefinitionError::UnknownRoot(self.root.clone()));
        }

        for (name, state) in &self.states {
            for target in state.targets() {
                self.resolve_target(name, target)?;
            }

            match state {
                State::Repeat(repeat) if repeat.count == 0 => {
                    return Err(invalid(name, "repeat count must be at least 1"));
                }
                State::Map(map) => {
                    if map.max_concurrency == Some(0) {
                        return Err(invalid(name, "max_concurrency must be at least 1"));
                    }
                    if let MapBody::Workflow(body) = &map.body {
                        body.validate()?;
                    }
                }
                State::Parallel(parallel) => self.validate_parallel(name, parallel)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_parallel(&self, name: &str, parallel: &Parallel) -> Result<(), DefinitionError> {
        if parallel.funcs.is_empty() {
            return Err(invalid(name, "parallel state has no branches"));
        }

        let mut keys = HashSet::new();
        for branch in &parallel.funcs {
            branch.workflow.validate()?;
            match branch.root_state() {
                Some(State::Task(_)) => {}
                Some(State::Map(map)) if !map.has_nested_body() => {}
                Some(other) => {
                    return Err(invalid(
                        name,
                        &format!(
                            "branch '{}' starts with a {} state; branches must start with a task or a single-activity map",
                            branch.workflow.root,
                            other.kind()
                        ),
                    ));
                }
                None => return Err(DefinitionError::UnknownRoot(branch.workflow.root.clone())),
            }
            if !keys.insert(branch.key()) {
                return Err(invalid(name, &format!("duplicate branch key '{}'", branch.key())));
            }
        }
        Ok(())
    }

    fn resolve_target(&self, state: &str, target: &str) -> Result<(), DefinitionError> {
        if self.states.contains_key(target) {
            Ok(())
        } else {
            Err(DefinitionError::UnknownTarget {
                state: state.to_string(),
                target: target.to_string(),
            })
        }
    }
}

fn invalid(state: &str, reason: &str) -> DefinitionError {
    DefinitionError::Invalid {
        state: state.to_string(),
        reason: reason.to_string(),
    }
}
