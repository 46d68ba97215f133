// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod sync;
pub mod task;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::Orchestrator;
use crate::task::TaskRegistry;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the task registry and orchestrator
/// - Ctrl-C and `--timeout` cancellation
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let registry = TaskRegistry::with_builtins();
    debug!(types = ?registry.types().collect::<Vec<_>>(), "task types available");

    let orchestrator = Orchestrator::from_config(&cfg, &registry)?;

    if args.dry_run {
        return print_dry_run(&cfg, &orchestrator);
    }

    // Ctrl-C → cooperative cancellation of the run.
    {
        let cancel = orchestrator.cancellation_token();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl-C received, cancelling run");
            cancel.cancel();
        });
    }

    if let Some(secs) = args.timeout {
        let cancel = orchestrator.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(timeout_secs = secs, "timeout reached, cancelling run");
            cancel.cancel();
        });
    }

    match args.task.as_deref() {
        Some(name) => orchestrator.run_task(name).await?,
        None => orchestrator.run().await?,
    }

    info!("all done");
    Ok(())
}

/// Simple dry-run output: print tasks, deps, order and the graph.
fn print_dry_run(cfg: &ConfigFile, orchestrator: &Orchestrator) -> Result<()> {
    println!("taskdag dry-run");
    println!(
        "  config.concurrent_limit = {}",
        cfg.config.effective_concurrent_limit()
    );
    println!();

    println!("tasks ({}):", cfg.task.len());
    for task in cfg.task.iter() {
        println!("  - {} ({})", task.name, task.kind);
        if !task.depend_on.is_empty() {
            println!("      dependOn: {:?}", task.depend_on);
        }
        for (key, value) in task.params.iter() {
            println!("      {key}: {value}");
        }
    }
    println!();

    println!("order: {}", orchestrator.order()?.join(" -> "));
    println!();
    println!("{}", orchestrator.to_dot());

    debug!("dry-run complete (no execution)");
    Ok(())
}
