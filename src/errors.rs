// src/errors.rs

//! Crate-wide error types.
//!
//! [`TaskdagError`] covers everything that can go wrong while building or
//! driving an orchestrator. [`RunError`] is the execution-time subset; it is
//! `Clone` so that a node's terminal outcome can be cached and handed to
//! every caller that asks for it.

use std::sync::Arc;

use thiserror::Error;

/// Type-erased, shareable error used for task bodies and hooks.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TaskdagError {
    #[error("cycle detected in task DAG: {path}")]
    Cycle { path: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    DependencyNotFound { task: String, dependency: String },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("promise already settled: cannot {0}")]
    AlreadySettled(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TaskdagError {
    pub fn config(msg: impl Into<String>) -> Self {
        TaskdagError::Config(msg.into())
    }
}

/// Failure observed while running a task node.
///
/// Every variant names the task whose `run` produced it, so the first error
/// surfaced by a fan-in identifies where the chain broke.
#[derive(Error, Debug, Clone)]
pub enum RunError {
    #[error("task '{task}': dependency failed")]
    Dependency {
        task: String,
        #[source]
        source: Arc<RunError>,
    },

    #[error("task '{task}': pre-run hook #{index} failed")]
    PreHook {
        task: String,
        index: usize,
        #[source]
        source: SharedError,
    },

    #[error("task '{task}': post-run hook #{index} failed")]
    PostHook {
        task: String,
        index: usize,
        #[source]
        source: SharedError,
    },

    #[error("task '{task}' failed")]
    Body {
        task: String,
        #[source]
        source: SharedError,
    },

    #[error("task '{task}' was abandoned before completing")]
    Aborted { task: String },
}

impl RunError {
    /// Name of the task that reported this error.
    pub fn task(&self) -> &str {
        match self {
            RunError::Dependency { task, .. }
            | RunError::PreHook { task, .. }
            | RunError::PostHook { task, .. }
            | RunError::Body { task, .. }
            | RunError::Aborted { task } => task,
        }
    }

    /// Follow `Dependency` links down to the error that started the chain.
    pub fn root(&self) -> &RunError {
        match self {
            RunError::Dependency { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Convert an `anyhow` error into the shareable form stored in [`RunError`].
pub fn share(err: anyhow::Error) -> SharedError {
    let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
    Arc::from(boxed)
}

pub type Result<T> = std::result::Result<T, TaskdagError>;
