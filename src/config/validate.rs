// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::config::duration::parse_duration;
use crate::config::model::{PlanFile, RawPlanFile, Settings, SettingsSection};
use crate::dag::Job;
use crate::errors::{DbxTesterError, Result};

impl TryFrom<RawPlanFile> for PlanFile {
    type Error = DbxTesterError;

    fn try_from(raw: RawPlanFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_jobs_and_tests(&raw)?;
        validate_job_identities(&raw)?;
        validate_job_dependencies(&raw)?;
        validate_tests(&raw)?;
        let order = dependency_order(&raw)?;
        let settings = settings_from_raw(&raw.settings)?;
        let jobs = build_jobs(&raw, &order)?;

        let tests = raw
            .test
            .into_iter()
            .map(|(name, decl)| (name, decl.root))
            .collect();

        Ok(PlanFile {
            settings,
            workspace: raw.workspace,
            jobs,
            tests,
        })
    }
}

impl PlanFile {
    /// Root jobs of the selected tests, in the order given.
    ///
    /// An empty selection means every test in the plan (lexical order).
    pub fn resolve_tests(&self, selected: &[String]) -> Result<Vec<(String, Job)>> {
        let names: Vec<String> = if selected.is_empty() {
            self.tests.keys().cloned().collect()
        } else {
            selected.to_vec()
        };

        names
            .into_iter()
            .map(|name| {
                let root = self.test_root(&name).cloned().ok_or_else(|| {
                    DbxTesterError::ConfigError(format!("unknown test '{name}'"))
                })?;
                Ok((name, root))
            })
            .collect()
    }
}

fn ensure_has_jobs_and_tests(plan: &RawPlanFile) -> Result<()> {
    if plan.job.is_empty() {
        return Err(DbxTesterError::ConfigError(
            "plan must contain at least one [job.<key>] section".to_string(),
        ));
    }
    if plan.test.is_empty() {
        return Err(DbxTesterError::ConfigError(
            "plan must contain at least one [test.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_job_identities(plan: &RawPlanFile) -> Result<()> {
    for (key, job) in plan.job.iter() {
        match (&job.name, job.job_id) {
            (None, None) => {
                return Err(DbxTesterError::ValidationError(format!(
                    "job '{key}' must set either `name` or `job_id`"
                )));
            }
            (Some(_), Some(_)) => {
                return Err(DbxTesterError::ValidationError(format!(
                    "job '{key}' must set only one of `name` or `job_id`"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_job_dependencies(plan: &RawPlanFile) -> Result<()> {
    for (key, job) in plan.job.iter() {
        for dep in job.depends_on.iter() {
            if dep == key {
                return Err(DbxTesterError::ConfigError(format!(
                    "job '{key}' cannot depend on itself in `depends_on`"
                )));
            }
            if !plan.job.contains_key(dep) {
                return Err(DbxTesterError::ConfigError(format!(
                    "job '{key}' has unknown dependency '{dep}' in `depends_on`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_tests(plan: &RawPlanFile) -> Result<()> {
    for (name, test) in plan.test.iter() {
        if !plan.job.contains_key(&test.root) {
            return Err(DbxTesterError::ConfigError(format!(
                "test '{name}' has unknown root job '{}'",
                test.root
            )));
        }
    }
    Ok(())
}

/// Job keys ordered so that every job comes after its dependencies.
///
/// Edge direction is dep -> job. A cycle makes the sort fail.
fn dependency_order(plan: &RawPlanFile) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for key in plan.job.keys() {
        graph.add_node(key.as_str());
    }

    for (key, job) in plan.job.iter() {
        for dep in job.depends_on.iter() {
            graph.add_edge(dep.as_str(), key.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(DbxTesterError::CircularDependency(format!(
            "cycle detected in job dependencies involving job '{}'",
            cycle.node_id()
        ))),
    }
}

fn settings_from_raw(raw: &SettingsSection) -> Result<Settings> {
    let poll_interval = parse_duration(&raw.poll_interval).map_err(|e| {
        DbxTesterError::ConfigError(format!("[settings].poll_interval: {e}"))
    })?;
    if poll_interval.is_zero() {
        return Err(DbxTesterError::ConfigError(
            "[settings].poll_interval must be greater than zero".to_string(),
        ));
    }

    Ok(Settings {
        cluster_id: raw.cluster_id.clone(),
        repo_path: raw.repo_path.clone(),
        test_path: raw.test_path.clone(),
        test_cache_path: raw.test_cache_path.clone(),
        log_path: raw.log_path.clone(),
        poll_interval,
    })
}

/// Turn declarations into [`Job`] values, dependencies first, so that every
/// `depends_on` key already has a built job to share.
fn build_jobs(plan: &RawPlanFile, order: &[String]) -> Result<BTreeMap<String, Job>> {
    let mut built: BTreeMap<String, Job> = BTreeMap::new();

    for key in order {
        let Some(decl) = plan.job.get(key) else {
            continue;
        };

        let mut builder = Job::builder()
            .key(key.clone())
            .params(decl.params.clone())
            .trigger(decl.trigger);
        if let Some(name) = &decl.name {
            builder = builder.name(name.clone());
        }
        if let Some(job_id) = decl.job_id {
            builder = builder.job_id(job_id);
        }
        for dep in decl.depends_on.iter() {
            let dep_job = built.get(dep).ok_or_else(|| {
                DbxTesterError::ConfigError(format!(
                    "job '{key}' has unknown dependency '{dep}' in `depends_on`"
                ))
            })?;
            builder = builder.depends_on(dep_job);
        }

        let job = builder.build()?;
        debug!(job = %key, deps = decl.depends_on.len(), "built job from plan");
        built.insert(key.clone(), job);
    }

    Ok(built)
}
