// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{PlanFile, RawPlanFile};
use crate::errors::{DbxTesterError, Result};

/// Load a plan file from a given path and return the raw `RawPlanFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPlanFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        DbxTesterError::ConfigError(format!("cannot read plan file {path:?}: {e}"))
    })?;

    let plan: RawPlanFile = toml::from_str(&contents)?;

    Ok(plan)
}

/// Load a plan file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default functions).
/// - Checks for:
///   - unknown or self `depends_on` references,
///   - dependency cycles,
///   - jobs with both or neither of `name` / `job_id`,
///   - tests naming an unknown root job,
///   - a malformed `poll_interval`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PlanFile> {
    let raw = load_from_path(&path)?;
    PlanFile::try_from(raw)
}

/// Default plan path: `DbxTester.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("DbxTester.toml")
}
