pub mod context;
pub mod interpreter;

pub use context::{Context, Stopwatch};
pub use interpreter::{Execution, Interpreter, compare};
