// src/task/mod.rs

//! Task capability and everything built around it.
//!
//! - [`Task`] is the contract every unit of work implements.
//! - [`registry`] maps `type` tags from config to task constructors.
//! - [`builtin`] provides the `echo` and `shell` tasks; [`sql`] the `sql`
//!   task when the `sql` feature is enabled.
//! - [`node`] wraps a task with its dependencies, hooks and the once-only
//!   execution guard.

pub mod builtin;
pub mod node;
pub mod registry;
#[cfg(feature = "sql")]
pub mod sql;

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::sync::RunnerPool;

pub use builtin::{EchoTask, OutputSink, ShellTask, stdout_sink};
pub use node::{TaskHook, TaskNode};
pub use registry::{TaskConstructor, TaskRegistry};

/// Boxed future returned by [`Task::run`].
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// A named unit of work.
///
/// `name` must be stable: it is the key used to resolve `dependOn` entries.
/// `run` may be long-running and should watch
/// [`RunContext::cancelled`] if it can stop early.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(&'a self, ctx: &'a RunContext) -> TaskFuture<'a>;
}

/// Per-run state shared by every node taking part in a run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancel: CancellationToken,
    pool: Option<RunnerPool>,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, pool: None }
    }

    /// Gate task bodies of this run behind `pool`.
    pub fn with_pool(mut self, pool: RunnerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn pool(&self) -> Option<&RunnerPool> {
        self.pool.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
