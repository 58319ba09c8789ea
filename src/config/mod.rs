// src/config/mod.rs

//! Plan file loading and validation for dbx-tester.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a plan file from disk (`loader.rs`).
//! - Validate it and turn job declarations into [`Job`](crate::dag::Job)
//!   trees (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{JobDecl, PlanFile, RawPlanFile, SettingsSection, Settings, TestDecl, WorkspaceSection};
