// src/exec/mod.rs

//! Remote execution layer.
//!
//! - [`runner`] defines the [`JobRunner`] trait the process manager drives,
//!   plus the run handle / status / error types that cross it.
//! - [`databricks`] provides [`DatabricksJobRunner`], the production
//!   implementation over the Jobs REST API. Tests replace it with a fake.

pub mod databricks;
pub mod runner;

pub use databricks::DatabricksJobRunner;
pub use runner::{JobRunner, PollError, RunHandle, RunStatus, RunnerError, RunnerFuture};
