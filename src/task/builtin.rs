// src/task/builtin.rs

//! Built-in task kinds: `echo` and `shell`.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow, bail};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::{RunContext, Task, TaskFuture};

/// Where built-in tasks write their output. Defaults to stdout.
pub type OutputSink = Arc<Mutex<dyn Write + Send>>;

pub fn stdout_sink() -> OutputSink {
    Arc::new(Mutex::new(std::io::stdout()))
}

fn write_to(out: &OutputSink, bytes: &[u8]) -> anyhow::Result<()> {
    let mut out = out.lock().map_err(|_| anyhow!("output sink lock poisoned"))?;
    out.write_all(bytes)?;
    out.flush()?;
    Ok(())
}

/// Fields of an `echo` task.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EchoParams {
    pub echostr: String,
}

/// Writes a fixed string followed by a newline.
pub struct EchoTask {
    name: String,
    text: String,
    out: OutputSink,
}

impl EchoTask {
    pub fn new(name: impl Into<String>, text: impl Into<String>, out: OutputSink) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            out,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Task for EchoTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, _ctx: &'a RunContext) -> TaskFuture<'a> {
        Box::pin(async move { write_to(&self.out, format!("{}\n", self.text).as_bytes()) })
    }
}

/// Fields of a `shell` / `sh` task.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellParams {
    pub shellcmd: String,
    #[serde(default)]
    pub shellcwd: Option<PathBuf>,
}

/// Runs a command line through the platform shell.
///
/// `{name}` in the command is replaced by the task name. Combined
/// stdout/stderr goes to the output sink; a non-zero exit is a failure.
/// The child is killed if the run is cancelled.
pub struct ShellTask {
    name: String,
    cmd: String,
    cwd: Option<PathBuf>,
    out: OutputSink,
}

impl ShellTask {
    pub fn new(
        name: impl Into<String>,
        cmd: impl Into<String>,
        cwd: Option<PathBuf>,
        out: OutputSink,
    ) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            cwd,
            out,
        }
    }

    /// The command line after placeholder substitution.
    pub fn command_line(&self) -> String {
        render(&self.cmd, &[("name", self.name.as_str())])
    }

    async fn run_inner(&self, ctx: &RunContext) -> anyhow::Result<()> {
        let line = self.command_line();
        info!(task = %self.name, cmd = %line, "starting shell command");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&line);
            c
        };

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning shell for task '{}'", self.name))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output
                .with_context(|| format!("waiting for shell of task '{}'", self.name))?,
            _ = ctx.cancelled() => bail!("shell command of task '{}' cancelled", self.name),
        };

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        write_to(&self.out, &combined)?;

        debug!(
            task = %self.name,
            exit_code = output.status.code().unwrap_or(-1),
            "shell command exited"
        );

        if !output.status.success() {
            bail!("command `{}` exited with {}", line, output.status);
        }
        Ok(())
    }
}

impl Task for ShellTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> TaskFuture<'a> {
        Box::pin(self.run_inner(ctx))
    }
}

/// Replace every `{key}` in `template` with its value.
pub fn render(template: &str, params: &[(&str, &str)]) -> String {
    params.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    fn buffer() -> (Arc<Mutex<Vec<u8>>>, OutputSink) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink: OutputSink = buf.clone();
        (buf, sink)
    }

    fn contents(buf: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(buf.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn render_replaces_placeholders() {
        assert_eq!(render("echo {name} {name}", &[("name", "A")]), "echo A A");
        assert_eq!(render("echo {other}", &[("name", "A")]), "echo {other}");
    }

    #[tokio::test]
    async fn echo_writes_line() {
        let (buf, sink) = buffer();
        let task = EchoTask::new("greet", "hello", sink);

        task.run(&RunContext::default()).await.unwrap();
        assert_eq!(contents(&buf), "hello\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_substitutes_name_and_captures_output() {
        let (buf, sink) = buffer();
        let task = ShellTask::new("build", "echo running {name}", None, sink);

        task.run(&RunContext::default()).await.unwrap();
        assert_eq!(contents(&buf), "running build\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_failure_reports_exit_status() {
        let (_buf, sink) = buffer();
        let task = ShellTask::new("bad", "exit 3", None, sink);

        let err = task.run(&RunContext::default()).await.unwrap_err();
        assert!(err.to_string().contains("exit"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_stops_when_cancelled() {
        let (_buf, sink) = buffer();
        let task = ShellTask::new("slow", "sleep 30", None, sink);
        let token = CancellationToken::new();
        let ctx = RunContext::new(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), task.run(&ctx))
            .await
            .expect("cancelled shell task should return promptly");
        assert!(result.unwrap_err().to_string().contains("cancelled"));
        canceller.await.unwrap();
    }
}
