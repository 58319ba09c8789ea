// src/engine/log.rs

//! Persisted log records and the sinks that receive them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::JobId;
use crate::engine::ProcessId;
use crate::errors::{DbxTesterError, Result};
use crate::exec::RunHandle;
use crate::types::{LifecycleState, ProcessState, ResultState, TriggerMode};

/// Log record of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLog {
    pub index: usize,
    pub job_key: String,
    pub job_id: JobId,
    pub trigger: TriggerMode,
    pub run_id: Option<RunHandle>,
    pub lifecycle_state: Option<LifecycleState>,
    pub result_state: Option<ResultState>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub error: Option<String>,
}

/// Log record of one process, written when it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessLog {
    pub process_id: ProcessId,
    pub name: String,
    pub final_state: ProcessState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub nodes: Vec<NodeLog>,
}

/// Receives final process logs.
pub trait LogSink: Send {
    fn persist(&mut self, log: &ProcessLog) -> Result<()>;
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn persist(&mut self, _log: &ProcessLog) -> Result<()> {
        Ok(())
    }
}

/// Writes each record as pretty JSON to `<dir>/<process_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileLogSink {
    dir: PathBuf,
}

impl JsonFileLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, process_id: &ProcessId) -> PathBuf {
        self.dir.join(format!("{process_id}.json"))
    }
}

impl LogSink for JsonFileLogSink {
    fn persist(&mut self, log: &ProcessLog) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&log.process_id);
        let json = serde_json::to_vec_pretty(log)?;
        std::fs::write(&path, json).map_err(|e| {
            DbxTesterError::IoError(std::io::Error::new(
                e.kind(),
                format!("writing process log {path:?}: {e}"),
            ))
        })?;
        debug!(process = %log.process_id, ?path, "persisted process log");
        Ok(())
    }
}

/// Keeps records in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<ProcessLog>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ProcessLog> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn persist(&mut self, log: &ProcessLog) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| DbxTesterError::Other(anyhow::anyhow!("log buffer poisoned")))?
            .push(log.clone());
        Ok(())
    }
}

/// Pick the sink for a configured log directory.
pub fn sink_for(log_path: Option<&Path>) -> Box<dyn LogSink> {
    match log_path {
        Some(dir) => Box::new(JsonFileLogSink::new(dir)),
        None => Box::new(NullLogSink),
    }
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn persist(&mut self, log: &ProcessLog) -> Result<()> {
        (**self).persist(log)
    }
}
