// src/exec/databricks.rs

//! [`JobRunner`] backed by the Databricks Jobs REST API (2.1).

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::WorkspaceSection;
use crate::dag::{JobId, JobParams, JobTarget};
use crate::errors::{DbxTesterError, Result};
use crate::types::{LifecycleState, ResultState};

use super::runner::{JobRunner, PollError, RunHandle, RunStatus, RunnerError, RunnerFuture};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to one Databricks workspace.
#[derive(Debug, Clone)]
pub struct DatabricksJobRunner {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl DatabricksJobRunner {
    pub fn new(host: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DbxTesterError::Other(anyhow::Error::from(e)))?;

        let host = host.into();
        Ok(Self {
            client,
            base_url: host.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Build a runner from the `[workspace]` section.
    ///
    /// The host falls back to `DATABRICKS_HOST`; the token is read from the
    /// environment variable named by `token_env`.
    pub fn from_workspace(workspace: &WorkspaceSection) -> Result<Self> {
        let host = workspace
            .host
            .clone()
            .or_else(|| std::env::var("DATABRICKS_HOST").ok())
            .ok_or_else(|| {
                DbxTesterError::ConfigError(
                    "no workspace host configured: set [workspace].host or DATABRICKS_HOST"
                        .to_string(),
                )
            })?;

        let token = std::env::var(&workspace.token_env).ok();
        if token.is_none() {
            warn!(
                token_env = %workspace.token_env,
                "no API token in environment; requests will be unauthenticated"
            );
        }

        Self::new(host, token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/2.1/jobs/{path}", self.base_url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> std::result::Result<Response, RunnerError> {
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(classify_failure(status, body))
        }
    }

    async fn resolve_by_name(&self, name: &str) -> std::result::Result<JobId, RunnerError> {
        let req = self
            .client
            .get(self.url("list"))
            .query(&[("name", name), ("limit", "2")]);
        let response = self.send(req).await?;
        let list: ListJobsResponse = response
            .json()
            .await
            .map_err(|e| RunnerError::Unavailable(format!("invalid jobs/list response: {e}")))?;

        if list.jobs.len() > 1 {
            warn!(job = %name, "several jobs share this name; using the first match");
        }

        list.jobs
            .first()
            .map(|job| job.job_id)
            .ok_or_else(|| RunnerError::NotFound(format!("name '{name}'")))
    }

    async fn resolve_by_id(&self, job_id: JobId) -> std::result::Result<JobId, RunnerError> {
        let req = self
            .client
            .get(self.url("get"))
            .query(&[("job_id", job_id)]);
        match self.send(req).await {
            Ok(_) => Ok(job_id),
            Err(RunnerError::NotFound(_)) | Err(RunnerError::Rejected(_)) => {
                Err(RunnerError::NotFound(format!("id {job_id}")))
            }
            Err(other) => Err(other),
        }
    }
}

impl JobRunner for DatabricksJobRunner {
    fn resolve<'a>(&'a self, target: &'a JobTarget) -> RunnerFuture<'a, std::result::Result<JobId, RunnerError>> {
        Box::pin(async move {
            debug!(%target, "resolving job");
            match target {
                JobTarget::Name(name) => self.resolve_by_name(name).await,
                JobTarget::Id(id) => self.resolve_by_id(*id).await,
            }
        })
    }

    fn start<'a>(
        &'a self,
        job_id: JobId,
        params: &'a JobParams,
    ) -> RunnerFuture<'a, std::result::Result<RunHandle, RunnerError>> {
        Box::pin(async move {
            let body = RunNowRequest {
                job_id,
                job_parameters: params,
            };
            let response = self
                .send(self.client.post(self.url("run-now")).json(&body))
                .await?;
            let run: RunNowResponse = response
                .json()
                .await
                .map_err(|e| RunnerError::Rejected(format!("invalid run-now response: {e}")))?;
            debug!(job_id, run_id = run.run_id, "run started");
            Ok(RunHandle(run.run_id.to_string()))
        })
    }

    fn poll<'a>(&'a self, handle: &'a RunHandle) -> RunnerFuture<'a, std::result::Result<RunStatus, PollError>> {
        Box::pin(async move {
            let req = self
                .client
                .get(self.url("runs/get"))
                .query(&[("run_id", handle.0.as_str())]);
            let response = self
                .send(req)
                .await
                .map_err(|e| PollError(e.to_string()))?;
            let body = response
                .text()
                .await
                .map_err(|e| PollError(e.to_string()))?;
            parse_run_status(&body).map_err(|e| PollError(format!("invalid runs/get response: {e}")))
        })
    }

    fn cancel<'a>(&'a self, handle: &'a RunHandle) -> RunnerFuture<'a, std::result::Result<(), RunnerError>> {
        Box::pin(async move {
            let run_id: u64 = handle
                .0
                .parse()
                .map_err(|_| RunnerError::Rejected(format!("malformed run id '{handle}'")))?;
            self.send(
                self.client
                    .post(self.url("runs/cancel"))
                    .json(&CancelRunRequest { run_id }),
            )
            .await?;
            Ok(())
        })
    }
}

/// Map a non-success HTTP answer onto the runner error taxonomy.
pub fn classify_failure(status: StatusCode, body: String) -> RunnerError {
    if status == StatusCode::NOT_FOUND {
        RunnerError::NotFound(body)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RunnerError::Unavailable(format!("{status}: {body}"))
    } else {
        RunnerError::Rejected(format!("{status}: {body}"))
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListJobsResponse {
    #[serde(default)]
    jobs: Vec<ListedJob>,
}

#[derive(Debug, Deserialize)]
struct ListedJob {
    job_id: JobId,
}

#[derive(Debug, Serialize)]
struct RunNowRequest<'a> {
    job_id: JobId,
    #[serde(skip_serializing_if = "no_params")]
    job_parameters: &'a JobParams,
}

fn no_params(params: &&JobParams) -> bool {
    params.is_empty()
}

#[derive(Debug, Deserialize)]
struct RunNowResponse {
    run_id: u64,
}

#[derive(Debug, Serialize)]
struct CancelRunRequest {
    run_id: u64,
}

#[derive(Debug, Deserialize)]
struct GetRunResponse {
    state: RunStateBody,
}

#[derive(Debug, Deserialize)]
struct RunStateBody {
    life_cycle_state: LifecycleState,
    #[serde(default)]
    result_state: Option<ResultState>,
}

/// Parse a `runs/get` body into a [`RunStatus`].
pub fn parse_run_status(body: &str) -> Result<RunStatus> {
    let run: GetRunResponse = serde_json::from_str(body)?;
    Ok(RunStatus {
        lifecycle: run.state.life_cycle_state,
        result: run.state.result_state,
    })
}
