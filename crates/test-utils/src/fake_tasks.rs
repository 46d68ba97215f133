use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde::Deserialize;
use taskdag::config::TaskConfig;
use taskdag::task::registry::params;
use taskdag::task::{OutputSink, RunContext, Task, TaskFuture, TaskRegistry};

/// Something a fake task did, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
    Cancelled(String),
}

/// Tracks how many fake bodies are running and the peak.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Fields accepted by the `fake` task type.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FakeParams {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub fail: bool,
    #[serde(default)]
    pub wait_for_cancel: bool,
}

/// A task that records its lifecycle instead of doing real work.
pub struct FakeTask {
    name: String,
    params: FakeParams,
    env: FakeEnv,
}

impl FakeTask {
    async fn body(&self, ctx: &RunContext) -> anyhow::Result<()> {
        self.env.push(Event::Started(self.name.clone()));
        self.env.gauge.enter();

        if self.params.wait_for_cancel {
            ctx.cancelled().await;
            self.env.gauge.leave();
            self.env.push(Event::Cancelled(self.name.clone()));
            return Err(anyhow!("{} cancelled", self.name));
        }

        if self.params.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.params.delay_ms)).await;
        }

        self.env.gauge.leave();
        self.env.push(Event::Finished(self.name.clone()));

        if self.params.fail {
            Err(anyhow!("{} failed on purpose", self.name))
        } else {
            Ok(())
        }
    }
}

impl Task for FakeTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> TaskFuture<'a> {
        Box::pin(self.body(ctx))
    }
}

/// Shared recording state plus a registry that knows the `fake` type and
/// the built-ins, with built-in output captured in memory.
#[derive(Clone)]
pub struct FakeEnv {
    events: Arc<Mutex<Vec<Event>>>,
    gauge: Arc<Gauge>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl FakeEnv {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            gauge: Arc::new(Gauge::default()),
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> TaskRegistry {
        let sink: OutputSink = self.output.clone();
        let mut registry = TaskRegistry::with_builtins_writing_to(sink);
        let env = self.clone();
        registry
            .register("fake", move |cfg: &TaskConfig| {
                let p: FakeParams = params(cfg)?;
                Ok(Arc::new(FakeTask {
                    name: cfg.name.clone(),
                    params: p,
                    env: env.clone(),
                }) as Arc<dyn Task>)
            })
            .expect("fake type registered once");
        registry
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// How many times the body of `name` started.
    pub fn starts(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == Event::Started(name.to_string()))
            .count()
    }

    /// Position of `event` in the log, if it happened.
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn max_concurrency(&self) -> usize {
        self.gauge.max()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
    }
}

impl Default for FakeEnv {
    fn default() -> Self {
        Self::new()
    }
}
