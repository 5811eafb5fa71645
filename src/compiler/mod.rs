//! Ahead-of-time translation of workflows into orchestration-service documents.

pub mod durable;
pub mod loader;
pub mod step_functions;
pub mod workflows;

use crate::dsl::{Loop, Map, Parallel, Repeat, State, Switch, Task, Workflow};
use crate::error::CompilationError;
use crate::resolver::ResourceResolver;
use serde_json::Value;
use std::collections::HashSet;

pub use durable::DurableGenerator;
pub use step_functions::StepFunctionsGenerator;
pub use workflows::WorkflowsGenerator;

/// One encoded unit of a backend document, addressed by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub name: String,
    pub body: Value,
}

impl Fragment {
    pub fn new(name: impl Into<String>, body: Value) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

/// A compiler backend.
///
/// Backends encode each state into fragments and assemble them in
/// `postprocess`. Repeat gets a default encoding (unrolled tasks); Parallel
/// does not, because every target offers a different concurrency primitive.
pub trait Generator {
    fn backend(&self) -> &'static str;

    fn encode_task(&mut self, name: &str, state: &Task) -> Result<Vec<Fragment>, CompilationError>;

    fn encode_switch(&mut self, name: &str, state: &Switch) -> Result<Vec<Fragment>, CompilationError>;

    fn encode_map(&mut self, name: &str, state: &Map) -> Result<Vec<Fragment>, CompilationError>;

    fn encode_loop(&mut self, name: &str, state: &Loop) -> Result<Vec<Fragment>, CompilationError>;

    fn encode_parallel(&mut self, name: &str, state: &Parallel) -> Result<Vec<Fragment>, CompilationError>;

    /// Unrolls into `count` chained tasks named `name`, `name_1`, ... `name_{count-1}`.
    fn encode_repeat(&mut self, name: &str, state: &Repeat) -> Result<Vec<Fragment>, CompilationError> {
        let mut fragments = Vec::new();
        for i in 0..state.count {
            let next = if i + 1 < state.count {
                Some(unrolled_name(name, i + 1))
            } else {
                state.next.clone()
            };
            let task = Task {
                func_name: state.func_name.clone(),
                next,
            };
            fragments.extend(self.encode_task(&unrolled_name(name, i), &task)?);
        }
        Ok(fragments)
    }

    fn encode_state(&mut self, name: &str, state: &State) -> Result<Vec<Fragment>, CompilationError> {
        match state {
            State::Task(s) => self.encode_task(name, s),
            State::Switch(s) => self.encode_switch(name, s),
            State::Map(s) => self.encode_map(name, s),
            State::Repeat(s) => self.encode_repeat(name, s),
            State::Loop(s) => self.encode_loop(name, s),
            State::Parallel(s) => self.encode_parallel(name, s),
        }
    }

    /// Assembles the backend's top-level document.
    fn postprocess(&mut self, workflow: &Workflow, fragments: Vec<Fragment>) -> Result<Value, CompilationError>;

    /// Serializes the document; JSON unless the backend says otherwise.
    fn export(&self, document: &Value) -> Result<String, CompilationError> {
        serde_json::to_string_pretty(document).map_err(|e| CompilationError::Export(e.to_string()))
    }

    /// Names `postprocess` adds around the encoded states.
    fn reserved_names(&self) -> &'static [&'static str] {
        &[]
    }

    /// Encodes every state in declaration order. Two fragments may not share
    /// a name, whether declared or synthesized.
    fn encode_states(&mut self, workflow: &Workflow) -> Result<Vec<Fragment>, CompilationError> {
        let mut taken: HashSet<String> = self.reserved_names().iter().map(|n| n.to_string()).collect();
        let mut fragments = Vec::new();
        for (name, state) in &workflow.states {
            for fragment in self.encode_state(name, state)? {
                if !taken.insert(fragment.name.clone()) {
                    return Err(CompilationError::Invalid {
                        backend: self.backend(),
                        state: name.clone(),
                        reason: format!("generated name '{}' is already taken", fragment.name),
                    });
                }
                fragments.push(fragment);
            }
        }
        Ok(fragments)
    }

    /// Encodes every state, in declaration order, into one document.
    fn encode_workflow(&mut self, workflow: &Workflow) -> Result<Value, CompilationError> {
        let fragments = self.encode_states(workflow)?;
        self.postprocess(workflow, fragments)
    }

    fn generate(&mut self, workflow: &Workflow) -> Result<String, CompilationError> {
        let document = self.encode_workflow(workflow)?;
        self.export(&document)
    }
}

pub(crate) fn unrolled_name(name: &str, i: usize) -> String {
    if i == 0 {
        name.to_string()
    } else {
        format!("{name}_{i}")
    }
}

pub(crate) fn resolve(
    resolver: &dyn ResourceResolver,
    activity: &str,
) -> Result<String, CompilationError> {
    resolver
        .resolve(activity)
        .ok_or_else(|| CompilationError::Unresolved(activity.to_string()))
}
