use crate::error::ActivityError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

pub mod builtin;
pub mod http;

/// What every activity call receives: the payload plus the correlation id of
/// the top-level invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityInput {
    pub payload: Value,
    pub request_id: String,
}

/// The activity invocation boundary used by the interpreter.
///
/// Implementations must tolerate many outstanding calls at once.
#[async_trait]
pub trait ActivityCaller: Send + Sync {
    async fn invoke(&self, activity: &str, input: ActivityInput) -> Result<Value, ActivityError>;
}

/// 插件接口：进程内活动实现此 Trait
#[async_trait]
pub trait ActivityHandler: Send + Sync + Debug {
    fn name(&self) -> &str;
    async fn execute(&self, input: ActivityInput) -> anyhow::Result<Value>;
}

/// Adapts a plain function over the payload into an `ActivityHandler`.
pub struct FnActivity<F> {
    name: String,
    func: F,
}

impl<F> FnActivity<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    pub fn new(name: &str, func: F) -> Self {
        Self {
            name: name.to_string(),
            func,
        }
    }
}

impl<F> Debug for FnActivity<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnActivity").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> ActivityHandler for FnActivity<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: ActivityInput) -> anyhow::Result<Value> {
        (self.func)(input.payload)
    }
}

/// In-process activities keyed by name.
#[derive(Default)]
pub struct ActivityRegistry {
    handlers: DashMap<String, Arc<dyn ActivityHandler>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn ActivityHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn register_fn<F>(&self, name: &str, func: F)
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnActivity::new(name, func)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[async_trait]
impl ActivityCaller for ActivityRegistry {
    async fn invoke(&self, activity: &str, input: ActivityInput) -> Result<Value, ActivityError> {
        // Clone the Arc so no map guard is held across the await.
        let handler = self
            .handlers
            .get(activity)
            .map(|h| h.value().clone())
            .ok_or_else(|| ActivityError::NotFound(activity.to_string()))?;

        handler
            .execute(input)
            .await
            .map_err(|source| ActivityError::Failed {
                activity: activity.to_string(),
                source,
            })
    }
}
