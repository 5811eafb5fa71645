use crate::activities::{ActivityCaller, ActivityInput};
use crate::error::ActivityError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// Answers every activity with its own payload. Used for dry runs, where the
/// control flow matters and the activities do not.
#[derive(Debug, Default)]
pub struct EchoCaller;

#[async_trait]
impl ActivityCaller for EchoCaller {
    async fn invoke(&self, activity: &str, input: ActivityInput) -> Result<Value, ActivityError> {
        info!(activity, request_id = %input.request_id, "[ECHO] {}", input.payload);
        Ok(input.payload)
    }
}
