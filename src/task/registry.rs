// src/task/registry.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::builtin::{EchoParams, EchoTask, OutputSink, ShellParams, ShellTask, stdout_sink};
use super::Task;
use crate::config::model::TaskConfig;
use crate::errors::{Result, TaskdagError};

/// Builds a task from its configuration record.
pub type TaskConstructor = Arc<dyn Fn(&TaskConfig) -> Result<Arc<dyn Task>> + Send + Sync>;

/// Mapping from `type` tag to task constructor.
///
/// Build one at startup, register everything, then hand it to the
/// orchestrator by reference; nothing mutates it after that.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    constructors: BTreeMap<String, TaskConstructor>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `echo`, `sh`, `shell` (and `sql` with the `sql`
    /// feature) writing to stdout.
    pub fn with_builtins() -> Self {
        Self::with_builtins_writing_to(stdout_sink())
    }

    /// Like [`TaskRegistry::with_builtins`], but echo and shell output goes
    /// to `out`.
    pub fn with_builtins_writing_to(out: OutputSink) -> Self {
        let mut registry = Self::new();
        registry.register_builtins(out);
        registry
    }

    fn register_builtins(&mut self, out: OutputSink) {
        let echo_out = Arc::clone(&out);
        let echo: TaskConstructor = Arc::new(move |cfg: &TaskConfig| {
            let p: EchoParams = params(cfg)?;
            Ok(Arc::new(EchoTask::new(&cfg.name, p.echostr, Arc::clone(&echo_out))) as Arc<dyn Task>)
        });

        let shell: TaskConstructor = Arc::new(move |cfg: &TaskConfig| {
            let p: ShellParams = params(cfg)?;
            Ok(Arc::new(ShellTask::new(&cfg.name, p.shellcmd, p.shellcwd, Arc::clone(&out)))
                as Arc<dyn Task>)
        });

        self.constructors.insert("echo".into(), echo);
        self.constructors.insert("sh".into(), Arc::clone(&shell));
        self.constructors.insert("shell".into(), shell);

        #[cfg(feature = "sql")]
        {
            let sql: TaskConstructor = Arc::new(|cfg: &TaskConfig| {
                let p: super::sql::SqlParams = params(cfg)?;
                Ok(Arc::new(super::sql::SqlTask::from_params(&cfg.name, p)?) as Arc<dyn Task>)
            });
            self.constructors.insert("sql".into(), sql);
        }
    }

    /// Register a constructor for `tag`. Fails if the tag is taken.
    pub fn register<F>(&mut self, tag: &str, constructor: F) -> Result<()>
    where
        F: Fn(&TaskConfig) -> Result<Arc<dyn Task>> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(tag) {
            return Err(TaskdagError::config(format!(
                "task type '{tag}' is already registered"
            )));
        }
        debug!(tag, "registering task type");
        self.constructors.insert(tag.to_string(), Arc::new(constructor));
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Construct the task described by `cfg`.
    pub fn build(&self, cfg: &TaskConfig) -> Result<Arc<dyn Task>> {
        let constructor = self.constructors.get(&cfg.kind).ok_or_else(|| {
            TaskdagError::config(format!(
                "task '{}' has unknown type '{}'",
                cfg.name, cfg.kind
            ))
        })?;
        constructor(cfg)
    }
}

/// Deserialize the type-specific fields of `cfg` into `T`.
///
/// Missing, mistyped or unexpected fields become a configuration error that
/// names the task.
pub fn params<T: DeserializeOwned>(cfg: &TaskConfig) -> Result<T> {
    toml::Value::Table(cfg.params.clone())
        .try_into()
        .map_err(|e| {
            TaskdagError::config(format!(
                "task '{}' (type '{}'): {}",
                cfg.name,
                cfg.kind,
                e.to_string().trim()
            ))
        })
}
