// src/config/mod.rs

//! Configuration loading and validation for taskdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk or a string (`loader.rs`).
//! - Validate basic invariants like unique task names (`validate.rs`).
//!
//! Type-specific task fields are validated later, when the orchestrator
//! builds each task through the registry.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{ConfigFile, ConfigSection, TaskConfig};
pub use validate::validate_config;
