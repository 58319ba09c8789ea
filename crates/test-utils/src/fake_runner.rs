use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use dbx_tester::dag::{JobId, JobParams, JobTarget};
use dbx_tester::exec::{JobRunner, PollError, RunHandle, RunStatus, RunnerError, RunnerFuture};
use dbx_tester::types::ResultState;

/// One scripted answer to a `poll`.
#[derive(Debug, Clone)]
pub enum PollStep {
    Status(RunStatus),
    Error(String),
}

pub fn running() -> PollStep {
    PollStep::Status(RunStatus::running())
}

pub fn succeeded() -> PollStep {
    PollStep::Status(RunStatus::terminated(ResultState::Success))
}

pub fn failed() -> PollStep {
    PollStep::Status(RunStatus::terminated(ResultState::Failed))
}

pub fn canceled() -> PollStep {
    PollStep::Status(RunStatus::terminated(ResultState::Canceled))
}

pub fn transient(msg: &str) -> PollStep {
    PollStep::Error(msg.to_string())
}

#[derive(Debug)]
struct FakeRun {
    job_id: JobId,
    script: VecDeque<PollStep>,
    last: Option<RunStatus>,
}

#[derive(Debug, Default)]
struct State {
    names: HashMap<String, JobId>,
    ids: HashSet<JobId>,
    scripts: HashMap<JobId, Vec<PollStep>>,
    rejected_starts: HashSet<JobId>,
    failing_cancel: bool,
    runs: HashMap<RunHandle, FakeRun>,
    next_run: u64,
    starts: Vec<(JobId, JobParams)>,
    polls: Vec<RunHandle>,
    cancels: Vec<RunHandle>,
}

/// A fake [`JobRunner`] that:
/// - resolves only the jobs it was told about
/// - gives every started run a copy of its job's poll script
/// - records every start, poll and cancel.
///
/// Each poll consumes one script step; once the script is exhausted the last
/// status is repeated. A job without a script succeeds on its first poll.
/// Clones share the same state, so a test can keep a handle for assertions
/// after moving the runner into a manager.
#[derive(Debug, Clone, Default)]
pub struct ScriptedJobRunner {
    state: Arc<Mutex<State>>,
}

impl ScriptedJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake runner state poisoned")
    }

    /// Make a job resolvable by name (and by id).
    pub fn with_job(self, name: &str, job_id: JobId) -> Self {
        {
            let mut state = self.lock();
            state.names.insert(name.to_string(), job_id);
            state.ids.insert(job_id);
        }
        self
    }

    /// Make a job resolvable by id only.
    pub fn with_job_id(self, job_id: JobId) -> Self {
        self.lock().ids.insert(job_id);
        self
    }

    /// Poll script handed to every run of `job_id`.
    pub fn with_script(self, job_id: JobId, steps: Vec<PollStep>) -> Self {
        self.lock().scripts.insert(job_id, steps);
        self
    }

    /// Refuse every start of `job_id`.
    pub fn with_rejected_start(self, job_id: JobId) -> Self {
        self.lock().rejected_starts.insert(job_id);
        self
    }

    /// Refuse every cancel request.
    pub fn with_failing_cancel(self) -> Self {
        self.lock().failing_cancel = true;
        self
    }

    /// Replace the remaining script of every run of `job_id`.
    pub fn script_runs(&self, job_id: JobId, steps: Vec<PollStep>) {
        let mut state = self.lock();
        for run in state.runs.values_mut().filter(|r| r.job_id == job_id) {
            run.script = steps.clone().into();
        }
    }

    /// Jobs started so far, in start order.
    pub fn starts(&self) -> Vec<JobId> {
        self.lock().starts.iter().map(|(id, _)| *id).collect()
    }

    pub fn start_params(&self) -> Vec<(JobId, JobParams)> {
        self.lock().starts.clone()
    }

    pub fn start_count(&self, job_id: JobId) -> usize {
        self.lock().starts.iter().filter(|(id, _)| *id == job_id).count()
    }

    pub fn polls(&self) -> Vec<RunHandle> {
        self.lock().polls.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.lock().polls.len()
    }

    pub fn cancels(&self) -> Vec<RunHandle> {
        self.lock().cancels.clone()
    }

    /// Job id behind a run handle handed out by this runner.
    pub fn job_of(&self, handle: &RunHandle) -> Option<JobId> {
        self.lock().runs.get(handle).map(|r| r.job_id)
    }
}

impl JobRunner for ScriptedJobRunner {
    fn resolve<'a>(&'a self, target: &'a JobTarget) -> RunnerFuture<'a, Result<JobId, RunnerError>> {
        Box::pin(async move {
            let state = self.lock();
            match target {
                JobTarget::Name(name) => state
                    .names
                    .get(name)
                    .copied()
                    .ok_or_else(|| RunnerError::NotFound(format!("name '{name}'"))),
                JobTarget::Id(id) if state.ids.contains(id) => Ok(*id),
                JobTarget::Id(id) => Err(RunnerError::NotFound(format!("id {id}"))),
            }
        })
    }

    fn start<'a>(
        &'a self,
        job_id: JobId,
        params: &'a JobParams,
    ) -> RunnerFuture<'a, Result<RunHandle, RunnerError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.starts.push((job_id, params.clone()));

            if state.rejected_starts.contains(&job_id) {
                return Err(RunnerError::Rejected(format!("job {job_id} cannot be started")));
            }

            state.next_run += 1;
            let handle = RunHandle(format!("run-{}", state.next_run));
            let script = state
                .scripts
                .get(&job_id)
                .cloned()
                .unwrap_or_else(|| vec![succeeded()]);
            state.runs.insert(
                handle.clone(),
                FakeRun {
                    job_id,
                    script: script.into(),
                    last: None,
                },
            );
            Ok(handle)
        })
    }

    fn poll<'a>(&'a self, handle: &'a RunHandle) -> RunnerFuture<'a, Result<RunStatus, PollError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.polls.push(handle.clone());

            let run = state
                .runs
                .get_mut(handle)
                .ok_or_else(|| PollError(format!("unknown run {handle}")))?;

            let lone = run.script.len() == 1;
            let step = if run.script.len() > 1 {
                run.script.pop_front()
            } else {
                run.script.front().cloned()
            };

            match step {
                Some(PollStep::Status(status)) => {
                    run.last = Some(status);
                    Ok(status)
                }
                Some(PollStep::Error(msg)) => {
                    // A lone trailing error would repeat forever; drop it.
                    if lone {
                        run.script.clear();
                    }
                    Err(PollError(msg))
                }
                None => Ok(run.last.unwrap_or_else(RunStatus::running)),
            }
        })
    }

    fn cancel<'a>(&'a self, handle: &'a RunHandle) -> RunnerFuture<'a, Result<(), RunnerError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.cancels.push(handle.clone());

            if state.failing_cancel {
                return Err(RunnerError::Unavailable("cancel refused".to_string()));
            }

            if let Some(run) = state.runs.get_mut(handle) {
                run.script = vec![canceled()].into();
            }
            Ok(())
        })
    }
}
