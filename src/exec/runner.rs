// src/exec/runner.rs

//! The seam between the orchestrator and the remote job platform.
//!
//! The [`JobRunner`] trait is what the process manager talks to. Production
//! code uses [`DatabricksJobRunner`](super::DatabricksJobRunner); tests plug
//! in a scripted fake that never touches the network.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dag::{JobId, JobParams, JobTarget};
use crate::types::{LifecycleState, NodeStatus, ResultState};

/// Boxed future returned by [`JobRunner`] methods.
pub type RunnerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque reference to one remote run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle(pub String);

impl fmt::Display for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle and (once terminal) result of a remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub lifecycle: LifecycleState,
    pub result: Option<ResultState>,
}

impl RunStatus {
    pub fn running() -> Self {
        Self {
            lifecycle: LifecycleState::Running,
            result: None,
        }
    }

    pub fn terminated(result: ResultState) -> Self {
        Self {
            lifecycle: LifecycleState::Terminated,
            result: Some(result),
        }
    }

    /// Collapse lifecycle + result into the status the scheduler reasons about.
    ///
    /// A run counts as terminal once either its lifecycle is terminal or a
    /// result is present. Anything other than a success or a cancellation is a
    /// failure, including platform-side errors and skipped runs.
    pub fn node_status(&self) -> NodeStatus {
        if !self.lifecycle.is_terminal() && self.result.is_none() {
            return NodeStatus::Running;
        }

        match self.result {
            Some(ResultState::Success) => NodeStatus::Success,
            Some(ResultState::Canceled) | Some(ResultState::UpstreamCanceled) => {
                NodeStatus::Canceled
            }
            Some(_) => NodeStatus::Failed,
            None => NodeStatus::Failed,
        }
    }
}

/// Errors from resolve/start/cancel calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunnerError {
    /// The job does not exist on the platform. Permanent.
    #[error("job {0} not found")]
    NotFound(String),

    /// The platform refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The platform could not be reached or answered with a server error.
    #[error("job platform unavailable: {0}")]
    Unavailable(String),
}

/// A poll that failed without telling us anything about the run.
///
/// Always transient from the scheduler's point of view: the status cache is
/// left untouched and the poll is retried on the next tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("poll failed: {0}")]
pub struct PollError(pub String);

/// Adapter over the external job submission/control API.
pub trait JobRunner: Send + Sync {
    /// Verify that `target` exists and return its numeric id.
    fn resolve<'a>(&'a self, target: &'a JobTarget) -> RunnerFuture<'a, Result<JobId, RunnerError>>;

    /// Fire exactly one remote run. Not idempotent.
    fn start<'a>(
        &'a self,
        job_id: JobId,
        params: &'a JobParams,
    ) -> RunnerFuture<'a, Result<RunHandle, RunnerError>>;

    /// Current status of a run. Safe to call repeatedly.
    fn poll<'a>(&'a self, handle: &'a RunHandle) -> RunnerFuture<'a, Result<RunStatus, PollError>>;

    /// Best-effort, idempotent cancellation request.
    fn cancel<'a>(&'a self, handle: &'a RunHandle) -> RunnerFuture<'a, Result<(), RunnerError>>;
}
