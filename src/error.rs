//! Error taxonomy for parsing, running and compiling workflows.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// A workflow definition could not be accepted. Raised eagerly at parse time.
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Malformed workflow JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to read workflow definition {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported definition format: {0}")]
    UnsupportedFormat(String),

    #[error("Root state not found: {0}")]
    UnknownRoot(String),

    #[error("State '{state}' references undeclared state '{target}'")]
    UnknownTarget { state: String, target: String },

    #[error("Invalid state '{state}': {reason}")]
    Invalid { state: String, reason: String },
}

/// A dotted path did not resolve against the payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("Empty variable path")]
    Empty,

    #[error("Path '{path}' not found: missing segment '{segment}'")]
    NotFound { path: String, segment: String },

    #[error("Path '{path}' not traversable at segment '{segment}': not an object")]
    NotTraversable { path: String, segment: String },
}

/// An invoked activity failed or did not answer in time.
#[derive(Error, Debug)]
pub enum ActivityError {
    #[error("Activity '{activity}' failed: {source}")]
    Failed {
        activity: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Activity '{activity}' timed out after {after:?}")]
    Timeout { activity: String, after: Duration },

    #[error("Activity not registered: {0}")]
    NotFound(String),
}

/// A backend cannot represent the given workflow.
#[derive(Error, Debug)]
pub enum CompilationError {
    #[error("{backend} backend cannot encode {kind} state '{state}'")]
    Unsupported {
        backend: &'static str,
        kind: &'static str,
        state: String,
    },

    #[error("No resource configured for activity '{0}'")]
    Unresolved(String),

    #[error("{backend} backend cannot encode state '{state}': {reason}")]
    Invalid {
        backend: &'static str,
        state: String,
        reason: String,
    },

    #[error("Failed to export document: {0}")]
    Export(String),
}

/// Failure of a single transition.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error("Value at '{path}' is not an array")]
    NotAnArray { path: String },

    #[error("Cannot compare {left} {op} {right}")]
    Incomparable {
        left: Value,
        op: &'static str,
        right: Value,
    },

    #[error("State not found: {0}")]
    UnknownState(String),

    #[error("Parallel branch '{branch}' cannot start with a {kind} state")]
    UnsupportedBranch { branch: String, kind: &'static str },

    #[error("Nested workflow depth limit {limit} exceeded")]
    DepthExceeded { limit: usize },

    #[error("Nested workflow failed: {0}")]
    Nested(#[source] Box<WorkflowError>),
}

/// A workflow instance aborted. Carries the state at which it failed and the
/// payload as it was when the transition started.
#[derive(Error, Debug)]
#[error("Workflow failed at state '{state}': {source}")]
pub struct WorkflowError {
    pub state: String,
    pub payload: Value,
    #[source]
    pub source: StepError,
}

impl WorkflowError {
    pub fn new(state: impl Into<String>, payload: Value, source: StepError) -> Self {
        Self {
            state: state.into(),
            payload,
            source,
        }
    }

    /// Follows nested sub-workflow failures down to the innermost cause.
    pub fn root_cause(&self) -> &StepError {
        match &self.source {
            StepError::Nested(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Failed state, payload snapshot and cause as one JSON object for
    /// diagnostics.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "state": self.state,
            "payload": self.payload,
            "error": self.root_cause().to_string(),
        })
    }
}
