use crate::activities::{ActivityCaller, ActivityInput};
use crate::error::ActivityError;
use crate::resolver::ResourceResolver;
use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Invokes activities through their HTTP triggers.
///
/// POSTs `{payload, request_id}` as JSON and takes the JSON response body as
/// the activity result.
pub struct HttpActivityCaller {
    client: Client,
    resolver: Arc<dyn ResourceResolver>,
}

impl HttpActivityCaller {
    pub fn new(resolver: Arc<dyn ResourceResolver>) -> Self {
        Self {
            client: Client::new(),
            resolver,
        }
    }

    pub fn with_client(client: Client, resolver: Arc<dyn ResourceResolver>) -> Self {
        Self { client, resolver }
    }
}

#[async_trait]
impl ActivityCaller for HttpActivityCaller {
    async fn invoke(&self, activity: &str, input: ActivityInput) -> Result<Value, ActivityError> {
        let url = self
            .resolver
            .resolve(activity)
            .ok_or_else(|| ActivityError::NotFound(activity.to_string()))?;
        let failed = |source: anyhow::Error| ActivityError::Failed {
            activity: activity.to_string(),
            source,
        };

        debug!(activity, url = %url, request_id = %input.request_id, "Invoking HTTP trigger");
        let response = self
            .client
            .post(&url)
            .json(&input)
            .send()
            .await
            .map_err(|e| failed(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(anyhow!("HTTP {} from {}: {}", status.as_u16(), url, body)));
        }

        response.json::<Value>().await.map_err(|e| failed(e.into()))
    }
}
