use crate::compiler::{Fragment, Generator};
use crate::dsl::{Loop, Map, Parallel, Repeat, Switch, Task, Workflow};
use crate::error::CompilationError;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};

const BACKEND: &str = "durable";

const PROLOGUE: &str = "\
import azure.durable_functions as df


def handler(context: df.DurableOrchestrationContext):
    input = context.get_input()
    payload = input[\"payload\"]
    request_id = input[\"request_id\"]
";

const EPILOGUE: &str = "\
    return payload


main = df.Orchestrator.create(handler)
";

/// Orchestrator glue for a durable-functions host.
///
/// The host can run the interpreter itself, so only task chains are emitted
/// here; anything else is reported as unsupported.
#[derive(Debug, Default)]
pub struct DurableGenerator;

impl DurableGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Generator for DurableGenerator {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn encode_task(&mut self, name: &str, state: &Task) -> Result<Vec<Fragment>, CompilationError> {
        let activity = serde_json::to_string(&state.func_name).map_err(|e| CompilationError::Export(e.to_string()))?;
        Ok(vec![Fragment::new(
            name,
            json!({
                "line": format!(
                    "payload = yield context.call_activity({activity}, {{\"payload\": payload, \"request_id\": request_id}})"
                ),
                "next": state.next,
            }),
        )])
    }

    fn encode_switch(&mut self, name: &str, _state: &Switch) -> Result<Vec<Fragment>, CompilationError> {
        Err(unsupported("switch", name))
    }

    fn encode_map(&mut self, name: &str, _state: &Map) -> Result<Vec<Fragment>, CompilationError> {
        Err(unsupported("map", name))
    }

    fn encode_repeat(&mut self, name: &str, _state: &Repeat) -> Result<Vec<Fragment>, CompilationError> {
        Err(unsupported("repeat", name))
    }

    fn encode_loop(&mut self, name: &str, _state: &Loop) -> Result<Vec<Fragment>, CompilationError> {
        Err(unsupported("loop", name))
    }

    fn encode_parallel(&mut self, name: &str, _state: &Parallel) -> Result<Vec<Fragment>, CompilationError> {
        Err(unsupported("parallel", name))
    }

    /// Orders the lines by following `next` from the root.
    fn postprocess(&mut self, workflow: &Workflow, fragments: Vec<Fragment>) -> Result<Value, CompilationError> {
        let lines: HashMap<String, Value> = fragments
            .into_iter()
            .map(|fragment| (fragment.name, fragment.body))
            .collect();

        let mut source = String::from(PROLOGUE);
        let mut visited = HashSet::new();
        let mut current = Some(workflow.root.clone());
        while let Some(name) = current {
            if !visited.insert(name.clone()) {
                return Err(CompilationError::Invalid {
                    backend: BACKEND,
                    state: name,
                    reason: "task chain loops back on itself".to_string(),
                });
            }
            let fragment = lines.get(&name).ok_or_else(|| CompilationError::Invalid {
                backend: BACKEND,
                state: name.clone(),
                reason: "no encoded line for state".to_string(),
            })?;
            let line = fragment["line"].as_str().unwrap_or_default();
            source.push_str("    ");
            source.push_str(line);
            source.push('\n');
            current = fragment["next"].as_str().map(str::to_string);
        }
        source.push_str(EPILOGUE);

        Ok(Value::String(source))
    }

    fn export(&self, document: &Value) -> Result<String, CompilationError> {
        match document {
            Value::String(source) => Ok(source.clone()),
            other => Err(CompilationError::Export(format!("expected orchestrator source, got {other}"))),
        }
    }
}

fn unsupported(kind: &'static str, state: &str) -> CompilationError {
    CompilationError::Unsupported {
        backend: BACKEND,
        kind,
        state: state.to_string(),
    }
}
