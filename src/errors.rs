// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::exec::RunnerError;

#[derive(Error, Debug)]
pub enum DbxTesterError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid job declaration: {0}")]
    ValidationError(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Unknown process: {0}")]
    UnknownProcess(String),

    #[error("Invalid operation on process {process}: {reason}")]
    InvalidProcessOperation { process: String, reason: String },

    #[error("Job platform error: {0}")]
    Runner(#[from] RunnerError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DbxTesterError>;
