// src/engine/process.rs

//! Pure per-process state: one execution of an [`ExecutionGraph`].
//!
//! Nothing in here performs IO. The [`ProcessManager`](super::ProcessManager)
//! asks a [`TestProcess`] what to do next, performs the remote calls, and
//! feeds the results back through the `pub(crate)` mutators.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::dag::{ExecutionGraph, JobId, NodeIndex};
use crate::engine::log::{NodeLog, ProcessLog};
use crate::engine::ProcessId;
use crate::exec::{RunHandle, RunStatus};
use crate::types::{NodeStatus, ProcessState};

/// Runtime record of one node, kept apart from the immutable graph.
#[derive(Debug, Clone)]
pub struct NodeRun {
    pub job_id: JobId,
    pub handle: Option<RunHandle>,
    /// Last polled status. Only ever written by an explicit poll (or a
    /// rejected start), never refreshed implicitly.
    pub status: Option<RunStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub cancel_requested: bool,
}

impl NodeRun {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            handle: None,
            status: None,
            started_at: None,
            ended_at: None,
            error: None,
            cancel_requested: false,
        }
    }

    /// Scheduler view of the cached status, if any has been observed.
    pub fn node_status(&self) -> Option<NodeStatus> {
        if self.error.is_some() {
            return Some(NodeStatus::Failed);
        }
        self.status.map(|s| s.node_status())
    }

    pub fn is_terminal(&self) -> bool {
        self.node_status().is_some_and(NodeStatus::is_terminal)
    }
}

/// One in-flight execution of a graph.
#[derive(Debug)]
pub struct TestProcess {
    id: ProcessId,
    name: String,
    graph: Arc<ExecutionGraph>,
    state: ProcessState,
    active_nodes: BTreeSet<NodeIndex>,
    runs: Vec<NodeRun>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TestProcess {
    /// Wrap `graph` with one resolved job id per node (arena order).
    pub fn new(id: ProcessId, graph: ExecutionGraph, job_ids: Vec<JobId>) -> Self {
        debug_assert_eq!(graph.len(), job_ids.len());
        let name = graph.root().key().to_string();
        Self {
            id,
            name,
            graph: Arc::new(graph),
            state: ProcessState::Pending,
            active_nodes: BTreeSet::new(),
            runs: job_ids.into_iter().map(NodeRun::new).collect(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    /// Human readable name; the root job's key.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    pub(crate) fn shared_graph(&self) -> Arc<ExecutionGraph> {
        Arc::clone(&self.graph)
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn active_nodes(&self) -> &BTreeSet<NodeIndex> {
        &self.active_nodes
    }

    pub fn run(&self, index: NodeIndex) -> Option<&NodeRun> {
        self.runs.get(index.0)
    }

    pub fn run_handle(&self, index: NodeIndex) -> Option<&RunHandle> {
        self.run(index).and_then(|r| r.handle.as_ref())
    }

    pub fn node_status(&self, index: NodeIndex) -> Option<NodeStatus> {
        self.run(index).and_then(NodeRun::node_status)
    }

    /// Active nodes that still need polling, with their run handles.
    pub fn pending_polls(&self) -> Vec<(NodeIndex, RunHandle)> {
        self.active_nodes
            .iter()
            .filter_map(|&index| {
                let run = &self.runs[index.0];
                if run.is_terminal() {
                    return None;
                }
                run.handle.clone().map(|h| (index, h))
            })
            .collect()
    }

    /// Nodes not yet started whose dependencies all have cached `SUCCESS`.
    pub fn ready_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .indices()
            .filter(|index| !self.active_nodes.contains(index))
            .filter(|&index| self.dependencies_succeeded(index))
            .collect()
    }

    pub fn dependencies_succeeded(&self, index: NodeIndex) -> bool {
        self.graph
            .dependencies_of(index)
            .iter()
            .all(|&dep| self.node_status(dep) == Some(NodeStatus::Success))
    }

    /// First active node whose cached status is `FAILED`.
    pub fn failed_node(&self) -> Option<NodeIndex> {
        self.first_active_with(NodeStatus::Failed)
    }

    /// First active node whose cached status is `CANCELED`.
    pub fn canceled_node(&self) -> Option<NodeIndex> {
        self.first_active_with(NodeStatus::Canceled)
    }

    fn first_active_with(&self, status: NodeStatus) -> Option<NodeIndex> {
        self.active_nodes
            .iter()
            .copied()
            .find(|&index| self.node_status(index) == Some(status))
    }

    /// Every node has been started and every cached status is `SUCCESS`.
    pub fn all_succeeded(&self) -> bool {
        self.active_nodes.len() == self.graph.len()
            && self
                .graph
                .indices()
                .all(|index| self.node_status(index) == Some(NodeStatus::Success))
    }

    /// Snapshot of the process for an external log collaborator.
    pub fn log(&self) -> ProcessLog {
        let nodes = self
            .graph
            .nodes()
            .map(|(index, job)| {
                let run = &self.runs[index.0];
                NodeLog {
                    index: index.0,
                    job_key: job.key().to_string(),
                    job_id: run.job_id,
                    trigger: job.trigger(),
                    run_id: run.handle.clone(),
                    lifecycle_state: run.status.map(|s| s.lifecycle),
                    result_state: run.status.and_then(|s| s.result),
                    started_at: run.started_at,
                    ended_at: run.ended_at,
                    cancel_requested: run.cancel_requested,
                    error: run.error.clone(),
                }
            })
            .collect();

        ProcessLog {
            process_id: self.id.clone(),
            name: self.name.clone(),
            final_state: self.state,
            created_at: self.created_at,
            finished_at: self.finished_at,
            nodes,
        }
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns `false` (and changes nothing) for a disallowed transition.
    pub(crate) fn transition(&mut self, next: ProcessState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                process = %self.id,
                from = %self.state,
                to = %next,
                "ignoring disallowed process transition"
            );
            return false;
        }

        debug!(process = %self.id, from = %self.state, to = %next, "process transition");
        self.state = next;
        if next.is_terminal() {
            self.finished_at.get_or_insert_with(Utc::now);
        }
        true
    }

    /// Record that `index` was started with `handle`.
    pub(crate) fn mark_started(&mut self, index: NodeIndex, handle: RunHandle) {
        let run = &mut self.runs[index.0];
        run.handle = Some(handle);
        run.started_at = Some(Utc::now());
        self.active_nodes.insert(index);
    }

    /// Record that the platform refused to start `index`.
    pub(crate) fn mark_start_failed(&mut self, index: NodeIndex, error: String) {
        let run = &mut self.runs[index.0];
        let now = Utc::now();
        run.started_at = Some(now);
        run.ended_at = Some(now);
        run.error = Some(error);
        self.active_nodes.insert(index);
    }

    /// Update the status cache for `index` from a poll.
    ///
    /// Terminal statuses are sticky: once a node is terminal, later polls are
    /// ignored. Returns `true` if the cached status changed.
    pub(crate) fn record_status(&mut self, index: NodeIndex, status: RunStatus) -> bool {
        let run = &mut self.runs[index.0];
        if run.is_terminal() || run.status == Some(status) {
            return false;
        }

        run.status = Some(status);
        if status.node_status().is_terminal() {
            run.ended_at = Some(Utc::now());
        }
        true
    }

    pub(crate) fn mark_cancel_requested(&mut self, index: NodeIndex) {
        self.runs[index.0].cancel_requested = true;
    }
}
