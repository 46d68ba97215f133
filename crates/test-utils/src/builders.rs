#![allow(dead_code)]

use taskdag::config::{ConfigFile, ConfigSection, TaskConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: ConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: ConfigFile {
                config: ConfigSection::default(),
                task: Vec::new(),
            },
        }
    }

    pub fn concurrent_limit(mut self, limit: usize) -> Self {
        self.config.config.concurrent_limit = limit;
        self
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.task.push(task);
        self
    }

    pub fn build(self) -> ConfigFile {
        self.config
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            task: TaskConfig::new(name, kind),
        }
    }

    /// A `fake` task (see [`crate::fake_tasks`]).
    pub fn fake(name: &str) -> Self {
        Self::new(name, "fake")
    }

    pub fn echo(name: &str, text: &str) -> Self {
        Self::new(name, "echo").param("echostr", text)
    }

    pub fn depend_on(mut self, dep: &str) -> Self {
        self.task.depend_on.push(dep.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.task.params.insert(key.to_string(), value.into());
        self
    }

    pub fn delay_ms(self, ms: i64) -> Self {
        self.param("delay_ms", ms)
    }

    pub fn fail(self) -> Self {
        self.param("fail", true)
    }

    pub fn wait_for_cancel(self) -> Self {
        self.param("wait_for_cancel", true)
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
