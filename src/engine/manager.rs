// src/engine/manager.rs

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::dag::{ExecutionGraph, JobParams, NodeIndex};
use crate::engine::log::{LogSink, ProcessLog};
use crate::engine::process::TestProcess;
use crate::engine::ProcessId;
use crate::errors::{DbxTesterError, Result};
use crate::exec::{JobRunner, PollError, RunStatus, RunnerError};
use crate::types::ProcessState;

/// One node's poll result within a tick.
type PollOutcome = (NodeIndex, std::result::Result<RunStatus, PollError>);

/// A state change observed during a manager operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTransition {
    pub process_id: ProcessId,
    pub from: ProcessState,
    pub to: ProcessState,
}

/// Structured result of one [`ProcessManager::monitor`] tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Processes that changed state during this tick.
    pub transitions: Vec<ProcessTransition>,
    /// Nodes that were started during this tick.
    pub started: Vec<(ProcessId, NodeIndex)>,
    /// Polls that failed transiently and will be retried next tick.
    pub poll_errors: usize,
}

impl TickReport {
    pub fn transition_of(&self, process_id: &str) -> Option<&ProcessTransition> {
        self.transitions.iter().find(|t| t.process_id == process_id)
    }
}

/// Owns every registered [`TestProcess`] and drives them to completion.
///
/// All mutation goes through `&mut self`, so two reconciliation steps for the
/// same process can never overlap. Processes are independent of each other:
/// a failure in one never changes another's state.
pub struct ProcessManager<R: JobRunner, S: LogSink> {
    runner: R,
    sink: S,
    settings: Settings,
    processes: BTreeMap<ProcessId, TestProcess>,
    /// Final states of processes no longer held in `processes`.
    retired: HashMap<ProcessId, ProcessState>,
}

impl<R: JobRunner, S: LogSink> ProcessManager<R, S> {
    pub fn new(runner: R, sink: S, settings: Settings) -> Self {
        Self {
            runner,
            sink,
            settings,
            processes: BTreeMap::new(),
            retired: HashMap::new(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Register `graph` as a new `PENDING` process.
    ///
    /// Every node's job is resolved against the platform first; a missing job
    /// fails the registration with [`DbxTesterError::JobNotFound`] and nothing
    /// is registered.
    pub async fn register_process(&mut self, graph: ExecutionGraph) -> Result<ProcessId> {
        let mut job_ids = Vec::with_capacity(graph.len());

        for (index, job) in graph.nodes() {
            match self.runner.resolve(job.target()).await {
                Ok(job_id) => {
                    debug!(node = %index, job = %job.key(), job_id, "resolved job");
                    job_ids.push(job_id);
                }
                Err(RunnerError::NotFound(_)) => {
                    return Err(DbxTesterError::JobNotFound(format!(
                        "job '{}' with {}",
                        job.key(),
                        job.target()
                    )));
                }
                Err(other) => return Err(DbxTesterError::Runner(other)),
            }
        }

        let id = Uuid::new_v4().to_string();
        let process = TestProcess::new(id.clone(), graph, job_ids);
        info!(
            process = %id,
            name = %process.name(),
            nodes = process.graph().len(),
            "registered test process"
        );
        self.processes.insert(id.clone(), process);
        Ok(id)
    }

    /// Start every entry point of a `PENDING` process.
    ///
    /// If the platform refuses one of the starts, the process goes straight to
    /// `FAILED`; this is reported through [`state`](Self::state), not as an
    /// error.
    pub async fn init(&mut self, id: &str) -> Result<()> {
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| unknown_process(id, &self.retired))?;

        if process.state() != ProcessState::Pending {
            return Err(DbxTesterError::InvalidProcessOperation {
                process: id.to_string(),
                reason: format!("init requires PENDING, process is {}", process.state()),
            });
        }

        process.transition(ProcessState::Running);
        let entry: Vec<NodeIndex> = process.graph().entry_points().iter().copied().collect();
        info!(process = %id, entry_points = entry.len(), "starting entry points");

        start_nodes(&self.runner, &self.settings, process, entry).await;

        if let Some(failed) = process.failed_node() {
            warn!(process = %id, node = %failed, "entry point could not be started");
            settle(process, ProcessState::Failed, &mut self.sink, None);
        }

        Ok(())
    }

    /// Explicitly cancel a process.
    ///
    /// Every node that is in flight is sent a cancel request; terminal nodes
    /// are left alone. Rejected cancels are logged and ignored. Stopping an
    /// already `CANCELED` process is a no-op.
    pub async fn stop(&mut self, id: &str) -> Result<()> {
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| unknown_process(id, &self.retired))?;

        if process.state() == ProcessState::Canceled {
            debug!(process = %id, "stop on canceled process; nothing to do");
            return Ok(());
        }

        cancel_runs(&self.runner, process).await;
        settle(process, ProcessState::Canceled, &mut self.sink, None);
        Ok(())
    }

    /// Cancel the runs a `FAILED` process still has in flight.
    ///
    /// The process stays `FAILED`. Returns how many cancel requests were
    /// sent; the updated log is persisted when that is non-zero.
    pub async fn cancel_in_flight(&mut self, id: &str) -> Result<usize> {
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| unknown_process(id, &self.retired))?;

        if process.state() != ProcessState::Failed {
            return Err(DbxTesterError::InvalidProcessOperation {
                process: id.to_string(),
                reason: format!(
                    "cancel_in_flight requires FAILED, process is {}",
                    process.state()
                ),
            });
        }

        let requested = cancel_runs(&self.runner, process).await;
        if requested > 0 {
            info!(process = %id, runs = requested, "canceled in-flight runs of failed process");
            if let Err(e) = self.sink.persist(&process.log()) {
                warn!(process = %id, error = %e, "failed to persist process log");
            }
        }
        Ok(requested)
    }

    /// Cancel leftover runs of every `FAILED` process.
    pub async fn cancel_failed_in_flight(&mut self) -> usize {
        let failed: Vec<ProcessId> = self
            .processes
            .values()
            .filter(|p| p.state() == ProcessState::Failed)
            .map(|p| p.id().clone())
            .collect();

        let mut requested = 0;
        for id in &failed {
            match self.cancel_in_flight(id).await {
                Ok(n) => requested += n,
                Err(e) => error!(process = %id, error = %e, "failed to cancel in-flight runs"),
            }
        }
        requested
    }

    /// Stop every process that is still `PENDING` or `RUNNING`.
    pub async fn stop_all(&mut self) -> Vec<ProcessId> {
        let live: Vec<ProcessId> = self
            .processes
            .values()
            .filter(|p| matches!(p.state(), ProcessState::Pending | ProcessState::Running))
            .map(|p| p.id().clone())
            .collect();

        for id in &live {
            if let Err(e) = self.stop(id).await {
                error!(process = %id, error = %e, "failed to stop process");
            }
        }
        live
    }

    /// One reconciliation tick over every `RUNNING` process.
    ///
    /// 1. Poll all in-flight nodes (concurrently) and update status caches.
    /// 2. A `FAILED` node fails its process; no new work is started for it.
    /// 3. Otherwise start each node whose dependencies have all succeeded.
    /// 4. A process whose nodes have all succeeded becomes `SUCCESS` and is
    ///    retired.
    pub async fn monitor(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let requests: Vec<(ProcessId, NodeIndex, _)> = self
            .processes
            .values()
            .filter(|p| p.state() == ProcessState::Running)
            .flat_map(|p| {
                p.pending_polls()
                    .into_iter()
                    .map(move |(index, handle)| (p.id().clone(), index, handle))
            })
            .collect();

        let runner = &self.runner;
        let results = join_all(
            requests
                .iter()
                .map(|(_, _, handle)| runner.poll(handle)),
        )
        .await;

        let mut polled: HashMap<ProcessId, Vec<PollOutcome>> = HashMap::new();
        for ((process_id, index, _), result) in requests.into_iter().zip(results) {
            polled.entry(process_id).or_default().push((index, result));
        }

        let running: Vec<ProcessId> = self
            .processes
            .values()
            .filter(|p| p.state() == ProcessState::Running)
            .map(|p| p.id().clone())
            .collect();

        for id in running {
            let results = polled.remove(&id).unwrap_or_default();
            self.reconcile(&id, results, &mut report).await;
        }

        report
    }

    async fn reconcile(
        &mut self,
        id: &ProcessId,
        results: Vec<PollOutcome>,
        report: &mut TickReport,
    ) {
        let Some(process) = self.processes.get_mut(id) else {
            return;
        };

        for (index, result) in results {
            match result {
                Ok(status) => {
                    if process.record_status(index, status) {
                        debug!(
                            process = %id,
                            node = %index,
                            lifecycle = ?status.lifecycle,
                            result = ?status.result,
                            "node status changed"
                        );
                    }
                }
                Err(e) => {
                    report.poll_errors += 1;
                    warn!(
                        process = %id,
                        node = %index,
                        error = %e,
                        "transient poll error; retrying next tick"
                    );
                }
            }
        }

        if let Some(failed) = process.failed_node() {
            warn!(process = %id, node = %failed, "node failed; failing process");
            settle(process, ProcessState::Failed, &mut self.sink, Some(report));
            return;
        }

        if let Some(canceled) = process.canceled_node() {
            warn!(
                process = %id,
                node = %canceled,
                "node canceled on the platform; canceling process"
            );
            settle(process, ProcessState::Canceled, &mut self.sink, Some(report));
            return;
        }

        let ready = process.ready_nodes();
        if !ready.is_empty() {
            let started = start_nodes(&self.runner, &self.settings, process, ready).await;
            report
                .started
                .extend(started.into_iter().map(|index| (id.clone(), index)));

            if let Some(failed) = process.failed_node() {
                warn!(process = %id, node = %failed, "node could not be started; failing process");
                settle(process, ProcessState::Failed, &mut self.sink, Some(report));
                return;
            }
        }

        if process.all_succeeded() {
            info!(process = %id, name = %process.name(), "all nodes succeeded");
            settle(process, ProcessState::Success, &mut self.sink, Some(report));
            self.processes.remove(id);
            self.retired.insert(id.clone(), ProcessState::Success);
        }
    }

    /// Current state of a process, including retired ones.
    pub fn state(&self, id: &str) -> Result<ProcessState> {
        if let Some(process) = self.processes.get(id) {
            return Ok(process.state());
        }
        self.retired
            .get(id)
            .copied()
            .ok_or_else(|| DbxTesterError::UnknownProcess(id.to_string()))
    }

    /// Remove a `FAILED` or `CANCELED` process and return its final log.
    pub fn acknowledge(&mut self, id: &str) -> Result<ProcessLog> {
        let state = match self.processes.get(id) {
            Some(process) => process.state(),
            None => return Err(unknown_process(id, &self.retired)),
        };

        if !matches!(state, ProcessState::Failed | ProcessState::Canceled) {
            return Err(DbxTesterError::InvalidProcessOperation {
                process: id.to_string(),
                reason: format!(
                    "only FAILED or CANCELED processes can be acknowledged, process is {state}"
                ),
            });
        }

        let process = self
            .processes
            .remove(id)
            .ok_or_else(|| DbxTesterError::UnknownProcess(id.to_string()))?;
        self.retired.insert(id.to_string(), state);
        info!(process = %id, state = %state, "process acknowledged");
        Ok(process.log())
    }

    /// Read-only view of a registered (not yet retired) process.
    pub fn process(&self, id: &str) -> Option<&TestProcess> {
        self.processes.get(id)
    }

    pub fn process_log(&self, id: &str) -> Result<ProcessLog> {
        self.processes
            .get(id)
            .map(TestProcess::log)
            .ok_or_else(|| unknown_process(id, &self.retired))
    }

    /// Ids of processes still held by the manager.
    pub fn process_ids(&self) -> impl Iterator<Item = &ProcessId> {
        self.processes.keys()
    }

    /// Whether any process is still `RUNNING`.
    pub fn has_running(&self) -> bool {
        self.processes
            .values()
            .any(|p| p.state() == ProcessState::Running)
    }
}

/// Start `nodes` one after another.
///
/// Stops at the first rejected start, which is recorded on the node as a
/// failure. Returns the nodes that were started.
async fn start_nodes<R: JobRunner>(
    runner: &R,
    settings: &Settings,
    process: &mut TestProcess,
    nodes: Vec<NodeIndex>,
) -> Vec<NodeIndex> {
    let graph = process.shared_graph();
    let mut started = Vec::new();

    for index in nodes {
        if process.active_nodes().contains(&index) {
            continue;
        }
        let (Some(job), Some(run)) = (graph.node(index), process.run(index)) else {
            continue;
        };

        let job_id = run.job_id;
        let params = effective_params(job.params(), settings);

        match runner.start(job_id, &params).await {
            Ok(handle) => {
                info!(
                    process = %process.id(),
                    node = %index,
                    job = %job.key(),
                    job_id,
                    run_id = %handle,
                    "started node"
                );
                process.mark_started(index, handle);
                started.push(index);
            }
            Err(e) => {
                error!(
                    process = %process.id(),
                    node = %index,
                    job = %job.key(),
                    job_id,
                    error = %e,
                    "platform rejected start"
                );
                process.mark_start_failed(index, e.to_string());
                break;
            }
        }
    }

    started
}

/// Send a cancel for every in-flight node of `process`.
///
/// Rejected cancels are logged and ignored. Returns the number of requests.
async fn cancel_runs<R: JobRunner>(runner: &R, process: &mut TestProcess) -> usize {
    let in_flight = process.pending_polls();
    for (index, _) in &in_flight {
        process.mark_cancel_requested(*index);
    }

    let outcomes = join_all(in_flight.iter().map(|(_, handle)| runner.cancel(handle))).await;
    for ((index, handle), outcome) in in_flight.iter().zip(outcomes) {
        match outcome {
            Ok(()) => info!(
                process = %process.id(),
                node = %index,
                run_id = %handle,
                "cancel requested"
            ),
            Err(e) => warn!(
                process = %process.id(),
                node = %index,
                run_id = %handle,
                error = %e,
                "cancel request failed; ignoring"
            ),
        }
    }
    in_flight.len()
}

/// Job parameters with process-wide settings filled in underneath.
fn effective_params(params: &JobParams, settings: &Settings) -> JobParams {
    let mut merged = params.clone();
    if let Some(cluster_id) = &settings.cluster_id {
        merged
            .entry("cluster_id".to_string())
            .or_insert_with(|| cluster_id.clone());
    }
    merged
}

/// Apply a terminal transition, record it, and hand the final log to `sink`.
fn settle<S: LogSink>(
    process: &mut TestProcess,
    next: ProcessState,
    sink: &mut S,
    report: Option<&mut TickReport>,
) {
    let from = process.state();
    if !process.transition(next) {
        return;
    }

    info!(process = %process.id(), from = %from, to = %next, "process settled");

    if let Some(report) = report {
        report.transitions.push(ProcessTransition {
            process_id: process.id().clone(),
            from,
            to: next,
        });
    }

    if let Err(e) = sink.persist(&process.log()) {
        warn!(process = %process.id(), error = %e, "failed to persist process log");
    }
}

fn unknown_process(id: &str, retired: &HashMap<ProcessId, ProcessState>) -> DbxTesterError {
    match retired.get(id) {
        Some(state) => DbxTesterError::InvalidProcessOperation {
            process: id.to_string(),
            reason: format!("process already finished with {state}"),
        },
        None => DbxTesterError::UnknownProcess(id.to_string()),
    }
}
