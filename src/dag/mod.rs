// src/dag/mod.rs

//! Job declarations and the execution graph built from them.
//!
//! - [`job`] holds the immutable [`Job`] declaration and its builder.
//! - [`graph`] flattens a job tree into an indexed [`ExecutionGraph`] and
//!   detects circular dependencies.

pub mod graph;
pub mod job;

pub use graph::{DependencyGraphBuilder, ExecutionGraph, NodeIndex};
pub use job::{Job, JobBuilder, JobId, JobParams, JobTarget};
