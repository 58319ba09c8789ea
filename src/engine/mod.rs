// src/engine/mod.rs

//! Orchestration engine for dbx-tester.
//!
//! This module ties together:
//! - [`process`]: the pure per-process state machine ([`TestProcess`])
//! - [`manager`]: the [`ProcessManager`] that owns every process and runs
//!   the reconciliation loop against a [`JobRunner`](crate::exec::JobRunner)
//! - [`log`]: the persisted log records and the sinks that receive them
//! - [`runtime`]: the async driver that ticks the manager until every
//!   process has settled, reacting to shutdown and an optional deadline

/// Opaque process identifier (a UUID v4 string).
pub type ProcessId = String;

pub mod log;
pub mod manager;
pub mod process;
pub mod runtime;

pub use log::{JsonFileLogSink, LogSink, MemoryLogSink, NodeLog, NullLogSink, ProcessLog, sink_for};
pub use manager::{ProcessManager, ProcessTransition, TickReport};
pub use process::{NodeRun, TestProcess};
pub use runtime::{Runtime, RuntimeOptions};
