use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a job is triggered once it becomes part of a test run.
///
/// - `OnDemand`: the default; started as soon as its dependencies succeed
///   (immediately for jobs without dependencies).
/// - `Wait`: an aggregating job that exists to wait on its dependencies.
///   It is only valid on a job that has at least one dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    #[default]
    OnDemand,
    Wait,
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on_demand" | "on-demand" | "ondemand" => Ok(TriggerMode::OnDemand),
            "wait" => Ok(TriggerMode::Wait),
            other => Err(format!(
                "invalid trigger: {other} (expected \"on_demand\" or \"wait\")"
            )),
        }
    }
}

/// State of one test process (one execution of an execution graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Success | ProcessState::Failed | ProcessState::Canceled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Pending -> Running -> {Success | Failed | Canceled}`, plus the explicit
    /// stop transition from `Pending` and `Failed` into `Canceled`.
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Success)
                | (Running, Failed)
                | (Pending, Canceled)
                | (Running, Canceled)
                | (Failed, Canceled)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Pending => "PENDING",
            ProcessState::Running => "RUNNING",
            ProcessState::Success => "SUCCESS",
            ProcessState::Failed => "FAILED",
            ProcessState::Canceled => "CANCELED",
        };
        f.pad(s)
    }
}

/// Scheduler-facing status of a single node's remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Running,
    Success,
    Failed,
    Canceled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeStatus::Running)
    }
}

/// Coarse lifecycle of a remote run, as reported by the job platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Pending,
    Queued,
    Running,
    Terminating,
    Terminated,
    Skipped,
    InternalError,
    Blocked,
    WaitingForRetry,
    #[serde(other)]
    Unknown,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Terminated | LifecycleState::Skipped | LifecycleState::InternalError
        )
    }
}

/// Outcome of a terminal remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultState {
    Success,
    SuccessWithFailures,
    Failed,
    Timedout,
    Canceled,
    Excluded,
    UpstreamFailed,
    UpstreamCanceled,
    MaximumConcurrentRunsReached,
    #[serde(other)]
    Unknown,
}
