// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::{Job, JobId, JobParams};
use crate::types::TriggerMode;

/// Plan file exactly as read from TOML, before validation.
///
/// ```toml
/// [settings]
/// cluster_id = "0101-123456-abcd"
/// log_path = "logs"
/// poll_interval = "10s"
///
/// [workspace]
/// host = "https://example.cloud.databricks.com"
///
/// [job.ingest]
/// name = "ingest_daily"
///
/// [job.validate]
/// job_id = 42
/// depends_on = ["ingest"]
/// trigger = "wait"
///
/// [test.nightly]
/// root = "validate"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlanFile {
    #[serde(default)]
    pub settings: SettingsSection,

    #[serde(default)]
    pub workspace: WorkspaceSection,

    /// All jobs from `[job.<key>]`, keyed by their local key.
    #[serde(default)]
    pub job: BTreeMap<String, JobDecl>,

    /// All tests from `[test.<name>]`.
    #[serde(default)]
    pub test: BTreeMap<String, TestDecl>,
}

/// `[settings]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsSection {
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    #[serde(default)]
    pub test_path: Option<PathBuf>,
    #[serde(default)]
    pub test_cache_path: Option<PathBuf>,
    /// Directory for per-process JSON logs. No file logs when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Duration string such as `"10s"`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

fn default_poll_interval() -> String {
    "10s".to_string()
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            cluster_id: None,
            repo_path: None,
            test_path: None,
            test_cache_path: None,
            log_path: None,
            poll_interval: default_poll_interval(),
        }
    }
}

/// `[workspace]` section: where the job platform lives.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSection {
    /// Falls back to `DATABRICKS_HOST` when unset.
    #[serde(default)]
    pub host: Option<String>,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "DATABRICKS_TOKEN".to_string()
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            host: None,
            token_env: default_token_env(),
        }
    }
}

/// `[job.<key>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDecl {
    /// Platform job name. Exactly one of `name` / `job_id` must be set.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub job_id: Option<JobId>,

    /// Parameters handed to the platform when the job is started.
    #[serde(default)]
    pub params: JobParams,

    /// Keys of the jobs this one waits for.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub trigger: TriggerMode,
}

/// `[test.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TestDecl {
    /// Key of the job at the top of this test's tree.
    pub root: String,
}

/// Process-wide settings handed to the
/// [`ProcessManager`](crate::engine::ProcessManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Forwarded as the `cluster_id` job parameter when set.
    pub cluster_id: Option<String>,
    pub repo_path: Option<PathBuf>,
    pub test_path: Option<PathBuf>,
    pub test_cache_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_id: None,
            repo_path: None,
            test_path: None,
            test_cache_path: None,
            log_path: None,
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// A validated plan: every dependency exists, the job graph is acyclic and
/// every declaration has been turned into a [`Job`].
///
/// Only constructible through `TryFrom<RawPlanFile>`.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub(crate) settings: Settings,
    pub(crate) workspace: WorkspaceSection,
    pub(crate) jobs: BTreeMap<String, Job>,
    /// Test name -> root job key.
    pub(crate) tests: BTreeMap<String, String>,
}

impl PlanFile {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn workspace(&self) -> &WorkspaceSection {
        &self.workspace
    }

    pub fn job(&self, key: &str) -> Option<&Job> {
        self.jobs.get(key)
    }

    pub fn jobs(&self) -> impl Iterator<Item = (&str, &Job)> {
        self.jobs.iter().map(|(k, j)| (k.as_str(), j))
    }

    /// Test names in lexical order.
    pub fn test_names(&self) -> impl Iterator<Item = &str> {
        self.tests.keys().map(String::as_str)
    }

    /// Root job of the named test.
    pub fn test_root(&self, test: &str) -> Option<&Job> {
        self.tests.get(test).and_then(|key| self.jobs.get(key))
    }
}
