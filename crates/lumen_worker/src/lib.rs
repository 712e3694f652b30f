//! Lumen Worker
//!
//! Runs one external classifier process per batch of files and turns its
//! newline-delimited JSON output into an ordered stream of results, removing
//! each item from the work queue once its result has been consumed.

pub mod cancel;
pub mod runner;

pub use cancel::CancellationToken;
pub use runner::{ClassifierRunner, ClassifierStream, ExecutionMode, RunnerConfig, RunnerError};
