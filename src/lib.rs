//! Provider-agnostic workflow state machines for serverless functions.
//!
//! A [`dsl::Workflow`] is either executed directly by the
//! [`runtime::Interpreter`] or translated ahead of time by one of the
//! [`compiler`] backends.

pub mod activities;
pub mod compiler;
pub mod config;
pub mod dsl;
pub mod error;
pub mod path;
pub mod resolver;
pub mod runtime;

pub use dsl::Workflow;
pub use runtime::{Execution, Interpreter};
