#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use dbx_tester::config::{
    JobDecl, PlanFile, RawPlanFile, Settings, SettingsSection, TestDecl, WorkspaceSection,
};
use dbx_tester::dag::{Job, JobId};
use dbx_tester::errors::Result;
use dbx_tester::types::TriggerMode;

/// Settings with a short poll interval for driver tests.
pub fn test_settings() -> Settings {
    Settings {
        poll_interval: Duration::from_millis(10),
        ..Settings::default()
    }
}

/// An `ON_DEMAND` job addressed by name, without dependencies.
pub fn job(name: &str) -> Job {
    Job::by_name(name).build().expect("valid job")
}

/// An `ON_DEMAND` job addressed by name that depends on `deps`.
pub fn job_after(name: &str, deps: &[&Job]) -> Job {
    Job::by_name(name)
        .depends_on_all(deps.iter().copied())
        .build()
        .expect("valid job")
}

/// A `WAIT` aggregator over `deps`.
pub fn aggregator(name: &str, deps: &[&Job]) -> Job {
    Job::by_name(name)
        .depends_on_all(deps.iter().copied())
        .trigger(TriggerMode::Wait)
        .build()
        .expect("valid aggregator")
}

/// Builder for `RawPlanFile` / `PlanFile` to simplify test setup.
pub struct PlanBuilder {
    plan: RawPlanFile,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            plan: RawPlanFile {
                settings: SettingsSection::default(),
                workspace: WorkspaceSection::default(),
                job: BTreeMap::new(),
                test: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, key: &str, job: JobDecl) -> Self {
        self.plan.job.insert(key.to_string(), job);
        self
    }

    pub fn with_test(mut self, name: &str, root: &str) -> Self {
        self.plan.test.insert(
            name.to_string(),
            TestDecl {
                root: root.to_string(),
            },
        );
        self
    }

    pub fn with_cluster_id(mut self, cluster_id: &str) -> Self {
        self.plan.settings.cluster_id = Some(cluster_id.to_string());
        self
    }

    pub fn with_poll_interval(mut self, interval: &str) -> Self {
        self.plan.settings.poll_interval = interval.to_string();
        self
    }

    pub fn raw(self) -> RawPlanFile {
        self.plan
    }

    pub fn try_build(self) -> Result<PlanFile> {
        PlanFile::try_from(self.plan)
    }

    pub fn build(self) -> PlanFile {
        self.try_build()
            .expect("Failed to build valid plan from builder")
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobDecl`.
pub struct JobDeclBuilder {
    job: JobDecl,
}

impl JobDeclBuilder {
    fn empty() -> JobDecl {
        JobDecl {
            name: None,
            job_id: None,
            params: BTreeMap::new(),
            depends_on: vec![],
            trigger: TriggerMode::OnDemand,
        }
    }

    pub fn named(name: &str) -> Self {
        let mut job = Self::empty();
        job.name = Some(name.to_string());
        Self { job }
    }

    pub fn id(job_id: JobId) -> Self {
        let mut job = Self::empty();
        job.job_id = Some(job_id);
        Self { job }
    }

    /// A declaration with neither name nor id.
    pub fn anonymous() -> Self {
        Self { job: Self::empty() }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.job.name = Some(name.to_string());
        self
    }

    pub fn job_id(mut self, job_id: JobId) -> Self {
        self.job.job_id = Some(job_id);
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.job.depends_on.push(dep.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.job.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn trigger(mut self, trigger: TriggerMode) -> Self {
        self.job.trigger = trigger;
        self
    }

    pub fn build(self) -> JobDecl {
        self.job
    }
}
