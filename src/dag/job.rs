// src/dag/job.rs

//! Job declarations: the unit of work a test graph is made of.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::errors::{DbxTesterError, Result};
use crate::types::TriggerMode;

/// Numeric job identifier on the job platform.
pub type JobId = u64;

/// Parameters handed to the platform when a run is started.
///
/// Opaque to the scheduler.
pub type JobParams = BTreeMap<String, String>;

static NEXT_JOB_UID: AtomicU64 = AtomicU64::new(1);

/// How a job is looked up on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTarget {
    Name(String),
    Id(JobId),
}

impl fmt::Display for JobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobTarget::Name(name) => write!(f, "name '{name}'"),
            JobTarget::Id(id) => write!(f, "id {id}"),
        }
    }
}

#[derive(Debug)]
struct JobSpec {
    uid: u64,
    key: String,
    target: JobTarget,
    params: JobParams,
    depends_on: Vec<Job>,
    trigger: TriggerMode,
}

/// An immutable job declaration.
///
/// Cloning a `Job` is cheap and the clone refers to the *same* job: the graph
/// builder treats clones as one node. Two jobs built separately are always
/// different nodes, even if their fields are equal.
#[derive(Debug, Clone)]
pub struct Job {
    inner: Arc<JobSpec>,
}

impl Job {
    /// Start declaring a job looked up by name.
    pub fn by_name(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new().name(name)
    }

    /// Start declaring a job looked up by numeric id.
    pub fn by_id(job_id: JobId) -> JobBuilder {
        JobBuilder::new().job_id(job_id)
    }

    pub fn builder() -> JobBuilder {
        JobBuilder::new()
    }

    /// Local key of this job, used in logs and plan files.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn target(&self) -> &JobTarget {
        &self.inner.target
    }

    pub fn params(&self) -> &JobParams {
        &self.inner.params
    }

    /// Direct dependencies, in declared order.
    pub fn depends_on(&self) -> &[Job] {
        &self.inner.depends_on
    }

    pub fn trigger(&self) -> TriggerMode {
        self.inner.trigger
    }

    /// Whether `self` and `other` are the same declared job (not merely equal).
    pub fn same_job(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn uid(&self) -> u64 {
        self.inner.uid
    }
}

/// Builder for [`Job`]. Validation happens in [`JobBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct JobBuilder {
    key: Option<String>,
    name: Option<String>,
    job_id: Option<JobId>,
    params: JobParams,
    depends_on: Vec<Job>,
    trigger: TriggerMode,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Override the local key. Defaults to the job name, or `job-<id>`.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: JobParams) -> Self {
        self.params.extend(params);
        self
    }

    pub fn depends_on(mut self, job: &Job) -> Self {
        self.depends_on.push(job.clone());
        self
    }

    pub fn depends_on_all<'a>(mut self, jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        self.depends_on.extend(jobs.into_iter().cloned());
        self
    }

    pub fn trigger(mut self, trigger: TriggerMode) -> Self {
        self.trigger = trigger;
        self
    }

    /// Validate the declaration and freeze it into a [`Job`].
    ///
    /// Rejects:
    /// - neither or both of name / id,
    /// - an empty name,
    /// - `trigger = wait` on a job without dependencies.
    pub fn build(self) -> Result<Job> {
        let target = match (self.name, self.job_id) {
            (None, None) => {
                return Err(DbxTesterError::ValidationError(
                    "either a job name or a job id must be provided".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(DbxTesterError::ValidationError(
                    "only one of job name or job id may be provided".to_string(),
                ));
            }
            (Some(name), None) => {
                if name.trim().is_empty() {
                    return Err(DbxTesterError::ValidationError(
                        "job name must be a non-empty string".to_string(),
                    ));
                }
                JobTarget::Name(name)
            }
            (None, Some(id)) => JobTarget::Id(id),
        };

        let key = match self.key {
            Some(key) => key,
            None => match &target {
                JobTarget::Name(name) => name.clone(),
                JobTarget::Id(id) => format!("job-{id}"),
            },
        };

        if self.trigger == TriggerMode::Wait && self.depends_on.is_empty() {
            return Err(DbxTesterError::ValidationError(format!(
                "job '{key}' uses trigger = wait but has no dependencies to wait for"
            )));
        }

        Ok(Job {
            inner: Arc::new(JobSpec {
                uid: NEXT_JOB_UID.fetch_add(1, Ordering::Relaxed),
                key,
                target,
                params: self.params,
                depends_on: self.depends_on,
                trigger: self.trigger,
            }),
        })
    }
}
