// src/task/node.rs

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use tracing::{debug, warn};

use super::{RunContext, Task};
use crate::dag::DagNode;
use crate::errors::{Result, RunError, TaskdagError, share};
use crate::sync::{Promise, get_all};

/// Function run right before or after a node's body.
pub type TaskHook = Arc<dyn Fn(&TaskNode) -> anyhow::Result<()> + Send + Sync>;

/// Future returned by [`TaskNode::run`].
pub type NodeFuture = Pin<Box<dyn Future<Output = std::result::Result<(), RunError>> + Send>>;

/// One task in the graph, plus everything needed to run it exactly once.
///
/// `run` may be called any number of times, concurrently, by the
/// orchestrator and by every dependent. The first call launches a single
/// driver that joins on the dependencies, then runs the pre-hooks, the body
/// and the post-hooks. Every caller, before or after, awaits that driver's
/// completion and receives the same outcome.
pub struct TaskNode {
    task: Arc<dyn Task>,
    // Weak so that a cyclic config does not leak its nodes.
    depend_on: OnceLock<Vec<Weak<TaskNode>>>,
    pre_hooks: Vec<TaskHook>,
    post_hooks: Vec<TaskHook>,
    started: OnceLock<Promise<(), RunError>>,
    outcome: OnceLock<std::result::Result<(), RunError>>,
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name())
            .field("depend_on", &self.dependency_names())
            .field("pre_hooks", &self.pre_hooks.len())
            .field("post_hooks", &self.post_hooks.len())
            .field("started", &self.is_started())
            .field("outcome", &self.outcome.get())
            .finish()
    }
}

impl TaskNode {
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            task,
            depend_on: OnceLock::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            started: OnceLock::new(),
            outcome: OnceLock::new(),
        }
    }

    pub fn with_pre_hook(mut self, hook: TaskHook) -> Self {
        self.pre_hooks.push(hook);
        self
    }

    pub fn with_post_hook(mut self, hook: TaskHook) -> Self {
        self.post_hooks.push(hook);
        self
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    /// Wire up dependencies. Allowed once per node.
    pub fn set_dependencies(&self, deps: &[Arc<TaskNode>]) -> Result<()> {
        self.depend_on
            .set(deps.iter().map(Arc::downgrade).collect())
            .map_err(|_| {
                TaskdagError::config(format!(
                    "dependencies of task '{}' were already resolved",
                    self.name()
                ))
            })
    }

    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Whether a run of this node has been launched.
    pub fn is_started(&self) -> bool {
        self.started.get().is_some()
    }

    /// Whether the body has been attempted.
    pub fn is_complete(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// Cached outcome of the hooks and body, once they have been attempted.
    pub fn outcome(&self) -> Option<std::result::Result<(), RunError>> {
        self.outcome.get().cloned()
    }

    /// Run dependencies, then this node, at most once per node.
    ///
    /// The first call decides the [`RunContext`] (cancellation token, pool)
    /// the node executes under; later calls only wait for the outcome.
    pub fn run(self: Arc<Self>, ctx: RunContext) -> NodeFuture {
        Box::pin(async move { self.start(&ctx).get().await })
    }

    /// Launch the driver unless one exists; return its completion.
    pub(crate) fn start(self: &Arc<Self>, ctx: &RunContext) -> Promise<(), RunError> {
        let mut launch = false;
        let promise = self
            .started
            .get_or_init(|| {
                launch = true;
                Promise::new()
            })
            .clone();

        if launch {
            debug!(task = %self.name(), "launching task");
            let settler = Settler {
                task: self.name().to_string(),
                promise: promise.clone(),
            };
            let driver = Arc::clone(self).drive(ctx.clone());
            tokio::spawn(async move {
                let outcome = driver.await;
                settler.settle(outcome);
            });
        }
        promise
    }

    fn drive(self: Arc<Self>, ctx: RunContext) -> NodeFuture {
        Box::pin(async move {
            self.wait_for_dependencies(&ctx).await?;

            let unwind = AbortUnlessRecorded { node: &self };
            let outcome = self.execute(&ctx).await;
            if let Err(err) = &outcome {
                warn!(task = %self.name(), error = %err, "task failed");
            }
            // Only the single driver writes here.
            let _ = self.outcome.set(outcome.clone());
            drop(unwind);
            outcome
        })
    }

    /// Start every dependency and join on all of them.
    async fn wait_for_dependencies(&self, ctx: &RunContext) -> std::result::Result<(), RunError> {
        let deps = self.resolved_dependencies()?;
        if deps.is_empty() {
            return Ok(());
        }

        let promises: Vec<_> = deps.iter().map(|dep| dep.start(ctx)).collect();

        get_all(&promises)
            .await
            .map(|_| ())
            .map_err(|source| RunError::Dependency {
                task: self.name().to_string(),
                source: Arc::new(source),
            })
    }

    /// Pre-hooks, body (behind the runner pool, if any), post-hooks.
    async fn execute(&self, ctx: &RunContext) -> std::result::Result<(), RunError> {
        let name = self.name().to_string();

        for (index, hook) in self.pre_hooks.iter().enumerate() {
            hook(self).map_err(|e| RunError::PreHook {
                task: name.clone(),
                index,
                source: share(e),
            })?;
        }

        let body = {
            let _token = match ctx.pool() {
                Some(pool) => Some(pool.acquire().await),
                None => None,
            };

            debug!(task = %name, "running task body");
            let started = Instant::now();
            let result = self.task.run(ctx).await;
            debug!(
                task = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                success = result.is_ok(),
                "task body finished"
            );
            result
        };

        body.map_err(|e| RunError::Body {
            task: name.clone(),
            source: share(e),
        })?;

        for (index, hook) in self.post_hooks.iter().enumerate() {
            hook(self).map_err(|e| RunError::PostHook {
                task: name.clone(),
                index,
                source: share(e),
            })?;
        }

        Ok(())
    }

    fn resolved_dependencies(&self) -> std::result::Result<Vec<Arc<TaskNode>>, RunError> {
        let Some(weak) = self.depend_on.get() else {
            return Ok(Vec::new());
        };
        weak.iter()
            .map(|w| {
                w.upgrade().ok_or_else(|| RunError::Aborted {
                    task: self.name().to_string(),
                })
            })
            .collect()
    }
}

impl DagNode for TaskNode {
    fn key(&self) -> &str {
        self.name()
    }

    fn dependencies(&self) -> Vec<Arc<Self>> {
        self.depend_on
            .get()
            .map(|deps| deps.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }
}

/// Records `Aborted` as the node's outcome if execution unwinds before an
/// outcome was stored (a panicking hook or body).
struct AbortUnlessRecorded<'a> {
    node: &'a TaskNode,
}

impl Drop for AbortUnlessRecorded<'_> {
    fn drop(&mut self) {
        if self.node.outcome.get().is_none() {
            let _ = self.node.outcome.set(Err(RunError::Aborted {
                task: self.node.name().to_string(),
            }));
        }
    }
}

/// Settles a driver's promise. If the driver dies without settling, the
/// promise is rejected with [`RunError::Aborted`] so joins never hang.
struct Settler {
    task: String,
    promise: Promise<(), RunError>,
}

impl Settler {
    fn settle(&self, outcome: std::result::Result<(), RunError>) {
        let settled = match outcome {
            Ok(()) => self.promise.set_result(()),
            Err(err) => self.promise.set_error(err),
        };
        if let Err(err) = settled {
            warn!(task = %self.task, error = %err, "promise settled twice");
        }
    }
}

impl Drop for Settler {
    fn drop(&mut self) {
        if !self.promise.is_settled() {
            let _ = self.promise.set_error(RunError::Aborted {
                task: self.task.clone(),
            });
        }
    }
}
