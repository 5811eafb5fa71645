use crate::activities::{ActivityCaller, ActivityInput};
use crate::config::InterpreterConfig;
use crate::dsl::{Branch, Comparison, Map, MapBody, State, Workflow};
use crate::error::{ActivityError, StepError, WorkflowError};
use crate::path;
use crate::runtime::context::{Context, Stopwatch};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, try_join_all};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one top-level invocation plus its correlation metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub request_id: String,
    pub payload: Value,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Orchestration time, excluding time spent waiting on activities.
    pub duration: Duration,
    /// Visited state names, in order.
    pub trace: Vec<String>,
}

struct Outcome {
    payload: Value,
    duration: Duration,
    trace: Vec<String>,
}

enum BranchShape {
    Single,
    Many(usize),
}

/// Walks a workflow directly, calling activities through an `ActivityCaller`.
pub struct Interpreter {
    caller: Arc<dyn ActivityCaller>,
    max_depth: usize,
    activity_timeout: Option<Duration>,
    map_max_concurrency: Option<usize>,
}

impl Interpreter {
    pub fn new(caller: Arc<dyn ActivityCaller>) -> Self {
        Self::with_config(caller, &InterpreterConfig::default())
    }

    pub fn with_config(caller: Arc<dyn ActivityCaller>, config: &InterpreterConfig) -> Self {
        Self {
            caller,
            max_depth: config.max_depth,
            activity_timeout: config.activity_timeout(),
            map_max_concurrency: config.map_max_concurrency,
        }
    }

    pub fn max_depth(mut self, limit: usize) -> Self {
        self.max_depth = limit;
        self
    }

    pub fn activity_timeout(mut self, after: Option<Duration>) -> Self {
        self.activity_timeout = after;
        self
    }

    /// Runs `workflow` under a fresh request id.
    pub async fn run(&self, workflow: &Workflow, payload: Value) -> Result<Execution, WorkflowError> {
        self.run_with_request_id(workflow, payload, &Uuid::new_v4().to_string())
            .await
    }

    pub async fn run_with_request_id(
        &self,
        workflow: &Workflow,
        payload: Value,
        request_id: &str,
    ) -> Result<Execution, WorkflowError> {
        let start = Utc::now();
        let ctx = Context::new(request_id);
        info!(request_id, root = %workflow.root, "Workflow started");

        let outcome = self.execute(workflow, payload, &ctx).await?;

        let end = Utc::now();
        info!(
            request_id,
            states = outcome.trace.len(),
            duration_us = outcome.duration.as_micros() as u64,
            "Workflow finished"
        );
        Ok(Execution {
            request_id: request_id.to_string(),
            payload: outcome.payload,
            start,
            end,
            duration: outcome.duration,
            trace: outcome.trace,
        })
    }

    fn execute<'a>(
        &'a self,
        workflow: &'a Workflow,
        payload: Value,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<Outcome, WorkflowError>> {
        Box::pin(async move {
            let mut payload = payload;
            let mut stopwatch = Stopwatch::start();
            let mut trace = Vec::new();
            let mut current = Some(workflow.root.as_str());

            while let Some(name) = current {
                let state = match workflow.get(name) {
                    Some(state) => state,
                    None => {
                        let source = StepError::UnknownState(name.to_string());
                        return Err(WorkflowError::new(name, payload, source));
                    }
                };
                debug!(state = name, kind = state.kind(), depth = ctx.depth(), "Entering state");
                trace.push(name.to_string());

                current = match self.step(name, state, &mut payload, ctx, &mut stopwatch).await {
                    Ok(next) => next,
                    Err(source) => {
                        error!(state = name, request_id = ctx.request_id(), error = %source, "State failed");
                        return Err(WorkflowError::new(name, payload, source));
                    }
                };
            }

            Ok(Outcome {
                payload,
                duration: stopwatch.finish(),
                trace,
            })
        })
    }

    async fn step<'w>(
        &self,
        name: &str,
        state: &'w State,
        payload: &mut Value,
        ctx: &Context,
        stopwatch: &mut Stopwatch,
    ) -> Result<Option<&'w str>, StepError> {
        match state {
            State::Task(task) => {
                stopwatch.suspend();
                let result = self.call(&task.func_name, payload.clone(), ctx).await;
                stopwatch.resume();
                *payload = result?;
                Ok(task.next.as_deref())
            }
            State::Switch(switch) => {
                for case in &switch.cases {
                    let value = path::get(payload, &case.var)?;
                    if compare(value, case.op, &case.val)? {
                        return Ok(Some(&case.next));
                    }
                }
                if switch.default.is_none() {
                    warn!(state = name, "No case matched and no default; ending workflow");
                }
                Ok(switch.default.as_deref())
            }
            State::Map(map) => {
                let inputs = map_inputs(payload, map)?;
                let limit = map
                    .max_concurrency
                    .or(self.map_max_concurrency)
                    .unwrap_or(inputs.len())
                    .max(1);
                debug!(state = name, elements = inputs.len(), limit, "Fanning out map");

                let calls = inputs
                    .into_iter()
                    .map(|input| self.apply_map_body(&map.body, input, ctx));

                stopwatch.suspend();
                let results: Result<Vec<Value>, StepError> =
                    stream::iter(calls).buffered(limit).try_collect().await;
                stopwatch.resume();

                path::set(payload, Value::Array(results?), &map.array)?;
                Ok(map.next.as_deref())
            }
            State::Repeat(repeat) => {
                for _ in 0..repeat.count {
                    stopwatch.suspend();
                    let result = self.call(&repeat.func_name, payload.clone(), ctx).await;
                    stopwatch.resume();
                    *payload = result?;
                }
                Ok(repeat.next.as_deref())
            }
            State::Loop(lp) => {
                // Iteration is for side effects only; results are discarded.
                for element in array_at(payload, &lp.array)? {
                    stopwatch.suspend();
                    let result = self.call(&lp.func_name, element, ctx).await;
                    stopwatch.resume();
                    result?;
                }
                Ok(lp.next.as_deref())
            }
            State::Parallel(parallel) => {
                // Multi-step map branches run their continuation once per element.
                let element_flows: Vec<Option<Workflow>> =
                    parallel.funcs.iter().map(Branch::element_workflow).collect();

                let mut calls: Vec<BoxFuture<'_, Result<Value, StepError>>> = Vec::new();
                let mut shapes = Vec::with_capacity(parallel.funcs.len());

                for (branch, flow) in parallel.funcs.iter().zip(&element_flows) {
                    match branch.root_state() {
                        Some(State::Task(task)) => {
                            let call = if task.next.is_some() {
                                self.invoke_nested(&branch.workflow, payload.clone(), ctx)
                            } else {
                                self.dispatch(&task.func_name, payload.clone(), ctx)
                            };
                            calls.push(call);
                            shapes.push((branch.key(), BranchShape::Single));
                        }
                        Some(State::Map(map)) => {
                            let func_name = map.func_name().ok_or_else(|| unsupported(branch, "map"))?;
                            let inputs = map_inputs(payload, map)?;
                            shapes.push((branch.key(), BranchShape::Many(inputs.len())));
                            for input in inputs {
                                let call = match flow {
                                    Some(continuation) => self.invoke_nested(continuation, input, ctx),
                                    None => self.dispatch(func_name, input, ctx),
                                };
                                calls.push(call);
                            }
                        }
                        Some(other) => return Err(unsupported(branch, other.kind())),
                        None => return Err(StepError::UnknownState(branch.workflow.root.clone())),
                    }
                }
                debug!(state = name, branches = shapes.len(), calls = calls.len(), "Fanning out parallel");

                stopwatch.suspend();
                let results = try_join_all(calls).await;
                stopwatch.resume();

                let mut results = results?.into_iter();
                let mut merged = serde_json::Map::new();
                for (key, shape) in shapes {
                    let value = match shape {
                        BranchShape::Single => results.next().unwrap_or(Value::Null),
                        // One element yields its bare result; none yields an empty list.
                        BranchShape::Many(1) => results.next().unwrap_or(Value::Null),
                        BranchShape::Many(n) => Value::Array(results.by_ref().take(n).collect()),
                    };
                    merged.insert(key.to_string(), value);
                }
                *payload = Value::Object(merged);
                Ok(parallel.next.as_deref())
            }
        }
    }

    async fn call(&self, activity: &str, payload: Value, ctx: &Context) -> Result<Value, ActivityError> {
        let input = ActivityInput {
            payload,
            request_id: ctx.request_id().to_string(),
        };
        match self.activity_timeout {
            Some(after) => timeout(after, self.caller.invoke(activity, input))
                .await
                .map_err(|_| ActivityError::Timeout {
                    activity: activity.to_string(),
                    after,
                })?,
            None => self.caller.invoke(activity, input).await,
        }
    }

    fn dispatch<'a>(
        &'a self,
        activity: &'a str,
        payload: Value,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move { Ok(self.call(activity, payload, ctx).await?) })
    }

    fn apply_map_body<'a>(
        &'a self,
        body: &'a MapBody,
        input: Value,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        match body {
            MapBody::Activity(func_name) => self.dispatch(func_name, input, ctx),
            MapBody::Workflow(workflow) => self.invoke_nested(workflow, input, ctx),
        }
    }

    /// Runs `workflow` as a sub-workflow under the same request id.
    fn invoke_nested<'a>(
        &'a self,
        workflow: &'a Workflow,
        payload: Value,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let child = ctx.nested(self.max_depth).ok_or(StepError::DepthExceeded {
                limit: self.max_depth,
            })?;
            let outcome = self
                .execute(workflow, payload, &child)
                .await
                .map_err(|e| StepError::Nested(Box::new(e)))?;
            Ok(outcome.payload)
        })
    }
}

/// Evaluates `left op right`. Numbers compare numerically, strings
/// lexicographically; mixed types only support `==` (always false).
pub fn compare(left: &Value, op: Comparison, right: &Value) -> Result<bool, StepError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b)),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match (op, ordering) {
        (Comparison::Equals, None) => Ok(left == right),
        (_, None) => Err(StepError::Incomparable {
            left: left.clone(),
            op: op.symbol(),
            right: right.clone(),
        }),
        (Comparison::LessThan, Some(o)) => Ok(o.is_lt()),
        (Comparison::LessThanEquals, Some(o)) => Ok(o.is_le()),
        (Comparison::Equals, Some(o)) => Ok(o.is_eq()),
        (Comparison::GreaterThanEquals, Some(o)) => Ok(o.is_ge()),
        (Comparison::GreaterThan, Some(o)) => Ok(o.is_gt()),
    }
}

fn array_at(payload: &Value, array: &str) -> Result<Vec<Value>, StepError> {
    path::get(payload, array)?
        .as_array()
        .cloned()
        .ok_or_else(|| StepError::NotAnArray {
            path: array.to_string(),
        })
}

/// Per-element call payloads: the element itself, or
/// `{array_element, <param>: <value>...}` when `common_params` is set.
fn map_inputs(payload: &Value, map: &Map) -> Result<Vec<Value>, StepError> {
    let elements = array_at(payload, &map.array)?;
    let params = map.common_params();
    if params.is_empty() {
        return Ok(elements);
    }

    let mut shared = Vec::with_capacity(params.len());
    for param in params {
        shared.push((param, path::get(payload, param)?.clone()));
    }

    Ok(elements
        .into_iter()
        .map(|element| {
            let mut obj = serde_json::Map::new();
            obj.insert("array_element".to_string(), element);
            for (param, value) in &shared {
                obj.insert(param.to_string(), value.clone());
            }
            Value::Object(obj)
        })
        .collect())
}

fn unsupported(branch: &Branch, kind: &'static str) -> StepError {
    StepError::UnsupportedBranch {
        branch: branch.workflow.root.clone(),
        kind,
    }
}
