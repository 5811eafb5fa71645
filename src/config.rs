//! Host configuration, loaded from YAML and overridden from the command line.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub interpreter: InterpreterConfig,
    pub activities: ActivitiesConfig,
    pub compiler: CompilerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Limit on nested sub-workflow invocations (Parallel/Map bodies).
    pub max_depth: usize,
    /// Per activity call; 0 disables the timeout.
    pub activity_timeout_secs: u64,
    /// Fan-out cap for Map states that do not set their own.
    pub map_max_concurrency: Option<usize>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            activity_timeout_secs: 60,
            map_max_concurrency: None,
        }
    }
}

impl InterpreterConfig {
    pub fn activity_timeout(&self) -> Option<Duration> {
        (self.activity_timeout_secs > 0).then(|| Duration::from_secs(self.activity_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActivitiesConfig {
    /// `{name}` is replaced by the activity name.
    pub endpoint_template: String,
    pub endpoints: HashMap<String, String>,
}

impl Default for ActivitiesConfig {
    fn default() -> Self {
        Self {
            endpoint_template: "http://localhost:8080/{name}".to_string(),
            endpoints: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompilerConfig {
    /// `{name}` is replaced by the activity name.
    pub resource_template: String,
    pub resources: HashMap<String, String>,
    /// Prefix of lifted Map sub-workflow identifiers.
    pub workflow_prefix: Option<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            resource_template: "arn:aws:lambda:us-east-1:000000000000:function:{name}".to_string(),
            resources: HashMap::new(),
            workflow_prefix: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;
        Ok(config)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
