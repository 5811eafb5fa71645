use crate::dsl::{Branch, Case, Comparison, Loop, Map, MapBody, Parallel, Repeat, State, Switch, Task, Workflow};
use crate::error::DefinitionError;
use indexmap::IndexMap;
use serde_json::Value;

/// Assembles a `Workflow` in code. `build` runs the same validation as parsing.
pub struct WorkflowBuilder {
    root: String,
    states: IndexMap<String, State>,
}

impl WorkflowBuilder {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            states: IndexMap::new(),
        }
    }

    pub fn state(mut self, name: &str, state: State) -> Self {
        self.states.insert(name.to_string(), state);
        self
    }

    pub fn task(self, name: &str, func_name: &str, next: Option<&str>) -> Self {
        self.state(
            name,
            State::Task(Task {
                func_name: func_name.to_string(),
                next: next.map(str::to_string),
            }),
        )
    }

    pub fn switch(self, name: &str) -> SwitchBuilder {
        SwitchBuilder {
            workflow_builder: self,
            name: name.to_string(),
            cases: Vec::new(),
            default: None,
        }
    }

    pub fn map(self, name: &str, func_name: &str, array: &str) -> MapBuilder {
        MapBuilder {
            workflow_builder: self,
            name: name.to_string(),
            map: Map {
                body: MapBody::Activity(func_name.to_string()),
                array: array.to_string(),
                common_params: None,
                max_concurrency: None,
                next: None,
            },
        }
    }

    /// A map whose per-element body is a nested workflow.
    pub fn map_workflow(self, name: &str, body: Workflow, array: &str) -> MapBuilder {
        self.map(name, "", array).body(body)
    }

    pub fn repeat(self, name: &str, func_name: &str, count: usize, next: Option<&str>) -> Self {
        self.state(
            name,
            State::Repeat(Repeat {
                func_name: func_name.to_string(),
                count,
                next: next.map(str::to_string),
            }),
        )
    }

    pub fn loop_over(self, name: &str, func_name: &str, array: &str, next: Option<&str>) -> Self {
        self.state(
            name,
            State::Loop(Loop {
                func_name: func_name.to_string(),
                array: array.to_string(),
                next: next.map(str::to_string),
            }),
        )
    }

    /// Adds a parallel block; each branch is a complete sub-workflow.
    pub fn parallel(self, name: &str, branches: Vec<Workflow>, next: Option<&str>) -> Self {
        let funcs = branches
            .into_iter()
            .map(|workflow| Branch { name: None, workflow })
            .collect();
        self.state(
            name,
            State::Parallel(Parallel {
                funcs,
                next: next.map(str::to_string),
            }),
        )
    }

    /// Builds without validating; for sub-workflows validated by their parent.
    pub fn build_unchecked(self) -> Workflow {
        Workflow {
            root: self.root,
            states: self.states,
        }
    }

    pub fn build(self) -> Result<Workflow, DefinitionError> {
        let workflow = self.build_unchecked();
        workflow.validate()?;
        Ok(workflow)
    }
}

pub struct SwitchBuilder {
    workflow_builder: WorkflowBuilder,
    name: String,
    cases: Vec<Case>,
    default: Option<String>,
}

impl SwitchBuilder {
    pub fn case(mut self, var: &str, op: Comparison, val: impl Into<Value>, next: &str) -> Self {
        self.cases.push(Case {
            var: var.to_string(),
            op,
            val: val.into(),
            next: next.to_string(),
        });
        self
    }

    pub fn default(mut self, next: &str) -> Self {
        self.default = Some(next.to_string());
        self
    }

    pub fn build(self) -> WorkflowBuilder {
        let switch = Switch {
            cases: self.cases,
            default: self.default,
        };
        self.workflow_builder.state(&self.name, State::Switch(switch))
    }
}

pub struct MapBuilder {
    workflow_builder: WorkflowBuilder,
    name: String,
    map: Map,
}

impl MapBuilder {
    pub fn common_params(mut self, params: &str) -> Self {
        self.map.common_params = Some(params.to_string());
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.map.max_concurrency = Some(limit);
        self
    }

    /// Replaces the single-activity body with a nested workflow.
    pub fn body(mut self, body: Workflow) -> Self {
        self.map.body = MapBody::Workflow(Box::new(body));
        self
    }

    pub fn next(mut self, next: &str) -> Self {
        self.map.next = Some(next.to_string());
        self
    }

    pub fn build(self) -> WorkflowBuilder {
        self.workflow_builder.state(&self.name, State::Map(self.map))
    }
}
