// src/engine/mod.rs

//! Orchestration engine for taskdag.
//!
//! [`orchestrator`] turns a [`crate::config::ConfigFile`] into a validated
//! graph of [`crate::task::TaskNode`]s and drives full-graph or single-task
//! runs over it.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorBuilder};
