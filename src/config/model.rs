// src/config/model.rs

use serde::Deserialize;

use crate::sync::DEFAULT_CONCURRENT_LIMIT;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// concurrent_limit = 2
///
/// [[task]]
/// name = "A"
/// type = "echo"
/// echostr = "hello"
///
/// [[task]]
/// name = "B"
/// type = "shell"
/// dependOn = ["A"]
/// shellcmd = "echo {name}"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// Global behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[[task]]`, in declaration order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of task bodies running at the same time.
    ///
    /// `0` means "use the default" (3).
    #[serde(default = "default_concurrent_limit")]
    pub concurrent_limit: usize,
}

fn default_concurrent_limit() -> usize {
    DEFAULT_CONCURRENT_LIMIT
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrent_limit: default_concurrent_limit(),
        }
    }
}

impl ConfigSection {
    /// The limit actually applied to the runner pool.
    pub fn effective_concurrent_limit(&self) -> usize {
        if self.concurrent_limit == 0 {
            DEFAULT_CONCURRENT_LIMIT
        } else {
            self.concurrent_limit
        }
    }
}

/// One `[[task]]` entry.
///
/// `name`, `type` and `dependOn` are common to every task; everything else
/// is kept in [`TaskConfig::params`] and interpreted by the constructor
/// registered for `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    /// The `type` tag, e.g. `"echo"`, `"shell"`, `"sql"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Names of tasks that must finish before this one starts.
    #[serde(rename = "dependOn", alias = "depend_on", default)]
    pub depend_on: Vec<String>,

    /// Type-specific fields (`echostr`, `shellcmd`, ...).
    #[serde(flatten)]
    pub params: toml::Table,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            depend_on: Vec::new(),
            params: toml::Table::new(),
        }
    }
}
