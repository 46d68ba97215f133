// src/engine/orchestrator.rs

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use petgraph::dot::{Config as DotConfig, Dot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::model::ConfigFile;
use crate::dag::Dag;
use crate::errors::{Result, TaskdagError};
use crate::sync::{RunnerPool, get_all};
use crate::task::{RunContext, TaskHook, TaskNode, TaskRegistry};

/// Which nodes a hook registered on the builder applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HookScope {
    All,
    Task(String),
}

impl HookScope {
    fn applies_to(&self, name: &str) -> bool {
        match self {
            HookScope::All => true,
            HookScope::Task(t) => t == name,
        }
    }
}

/// Collects hooks, then builds an [`Orchestrator`] from a config.
pub struct OrchestratorBuilder<'r> {
    registry: &'r TaskRegistry,
    pre_hooks: Vec<(HookScope, TaskHook)>,
    post_hooks: Vec<(HookScope, TaskHook)>,
}

impl<'r> OrchestratorBuilder<'r> {
    pub fn new(registry: &'r TaskRegistry) -> Self {
        Self {
            registry,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    /// Pre-run hook for every task.
    pub fn pre_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pre_hooks.push((HookScope::All, Arc::new(hook)));
        self
    }

    /// Pre-run hook for the task called `task`.
    pub fn pre_hook_for<F>(mut self, task: &str, hook: F) -> Self
    where
        F: Fn(&TaskNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pre_hooks
            .push((HookScope::Task(task.to_string()), Arc::new(hook)));
        self
    }

    /// Post-run hook for every task.
    pub fn post_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.post_hooks.push((HookScope::All, Arc::new(hook)));
        self
    }

    /// Post-run hook for the task called `task`.
    pub fn post_hook_for<F>(mut self, task: &str, hook: F) -> Self
    where
        F: Fn(&TaskNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.post_hooks
            .push((HookScope::Task(task.to_string()), Arc::new(hook)));
        self
    }

    /// Build every task, resolve dependencies and verify the graph.
    ///
    /// Any failure aborts the whole build; no partial orchestrator exists.
    pub fn build(self, cfg: &ConfigFile) -> Result<Orchestrator> {
        // 1. Construct nodes.
        let mut nodes: Vec<Arc<TaskNode>> = Vec::with_capacity(cfg.task.len());
        let mut by_name: HashMap<String, Arc<TaskNode>> = HashMap::new();

        for tc in &cfg.task {
            let task = self.registry.build(tc)?;
            let name = task.name().to_string();

            let mut node = TaskNode::new(task);
            for (scope, hook) in &self.pre_hooks {
                if scope.applies_to(&name) {
                    node = node.with_pre_hook(Arc::clone(hook));
                }
            }
            for (scope, hook) in &self.post_hooks {
                if scope.applies_to(&name) {
                    node = node.with_post_hook(Arc::clone(hook));
                }
            }

            let node = Arc::new(node);
            if by_name.insert(name.clone(), Arc::clone(&node)).is_some() {
                return Err(TaskdagError::config(format!(
                    "task name '{name}' is used more than once"
                )));
            }
            nodes.push(node);
        }

        self.check_hook_targets(&by_name)?;

        // 2. Resolve `dependOn` names into node references.
        for (tc, node) in cfg.task.iter().zip(&nodes) {
            let deps = tc
                .depend_on
                .iter()
                .map(|dep| {
                    by_name.get(dep).cloned().ok_or_else(|| {
                        TaskdagError::DependencyNotFound {
                            task: node.name().to_string(),
                            dependency: dep.clone(),
                        }
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            node.set_dependencies(&deps)?;
        }

        // 3. Register with the graph and verify it is acyclic.
        let mut dag = Dag::new();
        dag.add(nodes);
        dag.detect_cycles()?;

        let pool = RunnerPool::new(cfg.config.effective_concurrent_limit());
        info!(
            tasks = dag.len(),
            concurrent_limit = pool.capacity(),
            "task DAG built"
        );

        Ok(Orchestrator {
            dag,
            by_name,
            pool,
            cancel: CancellationToken::new(),
        })
    }

    fn check_hook_targets(&self, by_name: &HashMap<String, Arc<TaskNode>>) -> Result<()> {
        for (scope, _) in self.pre_hooks.iter().chain(&self.post_hooks) {
            if let HookScope::Task(name) = scope {
                if !by_name.contains_key(name) {
                    return Err(TaskdagError::config(format!(
                        "hook registered for unknown task '{name}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A validated task graph, ready to run.
pub struct Orchestrator {
    dag: Dag<TaskNode>,
    by_name: HashMap<String, Arc<TaskNode>>,
    pool: RunnerPool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tasks", &self.task_names())
            .field("concurrent_limit", &self.pool.capacity())
            .finish()
    }
}

impl Orchestrator {
    pub fn builder(registry: &TaskRegistry) -> OrchestratorBuilder<'_> {
        OrchestratorBuilder::new(registry)
    }

    /// Build without hooks.
    pub fn from_config(cfg: &ConfigFile, registry: &TaskRegistry) -> Result<Self> {
        Self::builder(registry).build(cfg)
    }

    /// Parent cancellation token of every run.
    ///
    /// Cancelling it (Ctrl-C, a deadline) signals every in-flight and future
    /// task body. Bodies have to observe it themselves.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn concurrent_limit(&self) -> usize {
        self.pool.capacity()
    }

    /// Task names in declaration order.
    pub fn task_names(&self) -> Vec<&str> {
        self.dag.nodes().iter().map(|n| n.name()).collect()
    }

    pub fn node(&self, name: &str) -> Option<&Arc<TaskNode>> {
        self.by_name.get(name)
    }

    /// Task names in dependency order (dependencies first).
    pub fn order(&self) -> Result<Vec<String>> {
        let mut order = Vec::with_capacity(self.dag.len());
        self.dag.iterate::<TaskdagError, _>(|node| {
            order.push(node.name().to_string());
            ControlFlow::Continue(())
        })?;
        Ok(order)
    }

    /// Graphviz rendering, edges pointing from dependency to dependent.
    pub fn to_dot(&self) -> String {
        let graph = self.dag.to_petgraph();
        format!("{:?}", Dot::with_config(&graph, &[DotConfig::EdgeNoLabel]))
    }

    fn run_context(&self) -> RunContext {
        RunContext::new(self.cancel.child_token()).with_pool(self.pool.clone())
    }

    /// Run a single task and, transitively, its dependencies.
    pub async fn run_task(&self, name: &str) -> Result<()> {
        let node = self
            .by_name
            .get(name)
            .ok_or_else(|| TaskdagError::TaskNotFound(name.to_string()))?;

        info!(task = %name, "running single task");
        Arc::clone(node)
            .run(self.run_context())
            .await
            .map_err(TaskdagError::from)
    }

    /// Run every task.
    ///
    /// Every node is started at once; ordering comes from each node's own
    /// dependency join. Nodes already launched by an earlier run are not
    /// relaunched. The first failure cancels this run's token and is
    /// returned without waiting for the remaining work.
    pub async fn run(&self) -> Result<()> {
        let ctx = self.run_context();
        info!(
            tasks = self.dag.len(),
            concurrent_limit = self.pool.capacity(),
            "starting DAG run"
        );

        let promises: Vec<_> = self
            .dag
            .nodes()
            .iter()
            .map(|node| node.start(&ctx))
            .collect();
        debug!(launched = promises.len(), "all tasks launched");

        match get_all(&promises).await {
            Ok(_) => {
                info!("DAG run finished");
                Ok(())
            }
            Err(err) => {
                ctx.cancellation_token().cancel();
                error!(
                    error = %err,
                    origin = %err.root(),
                    "DAG run failed; cancelled remaining work"
                );
                Err(err.into())
            }
        }
    }
}
