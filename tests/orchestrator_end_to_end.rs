use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use taskdag::config::ConfigFile;
use taskdag::engine::Orchestrator;
use taskdag::errors::{RunError, TaskdagError};
use taskdag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use taskdag_test_utils::fake_tasks::{Event, FakeEnv};
use taskdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn started(name: &str) -> Event {
    Event::Started(name.to_string())
}

fn finished(name: &str) -> Event {
    Event::Finished(name.to_string())
}

/// A (no deps), B (dep A), C (dep A, B).
fn abc(env_delay_ms: i64) -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("C").depend_on("A").depend_on("B").build())
        .with_task(TaskConfigBuilder::fake("B").depend_on("A").build())
        .with_task(TaskConfigBuilder::fake("A").delay_ms(env_delay_ms).build())
        .build()
}

#[tokio::test]
async fn full_run_executes_each_body_once_in_dependency_order() -> TestResult {
    init_tracing();
    let env = FakeEnv::new();
    let orchestrator = Orchestrator::from_config(&abc(30), &env.registry())?;

    with_timeout(orchestrator.run()).await?;

    for name in ["A", "B", "C"] {
        assert_eq!(env.starts(name), 1, "{name} should run exactly once");
    }

    let a_done = env.position(&finished("A")).unwrap();
    assert!(a_done < env.position(&started("B")).unwrap());
    assert!(a_done < env.position(&started("C")).unwrap());
    assert!(env.position(&finished("B")).unwrap() < env.position(&started("C")).unwrap());

    assert_eq!(orchestrator.order()?, vec!["A", "B", "C"]);
    Ok(())
}

#[tokio::test]
async fn second_run_does_not_rerun_bodies() -> TestResult {
    let env = FakeEnv::new();
    let orchestrator = Orchestrator::from_config(&abc(0), &env.registry())?;

    with_timeout(orchestrator.run()).await?;
    with_timeout(orchestrator.run()).await?;
    with_timeout(orchestrator.run_task("C")).await?;

    assert_eq!(env.events().len(), 6);
    Ok(())
}

#[tokio::test]
async fn echo_task_prints_configured_string() -> TestResult {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::echo("greet", "hello").build())
        .build();
    let orchestrator = Orchestrator::from_config(&cfg, &env.registry())?;

    with_timeout(orchestrator.run()).await?;

    assert_eq!(env.output(), "hello\n");
    Ok(())
}

#[test]
fn missing_dependency_fails_construction() {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("A").depend_on("ghost").build())
        .build();

    match Orchestrator::from_config(&cfg, &env.registry()) {
        Err(TaskdagError::DependencyNotFound { task, dependency }) => {
            assert_eq!(task, "A");
            assert_eq!(dependency, "ghost");
        }
        other => panic!("expected dependency error, got {other:?}"),
    }
}

#[test]
fn cycle_fails_construction() {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("A").depend_on("B").build())
        .with_task(TaskConfigBuilder::fake("B").depend_on("A").build())
        .build();

    match Orchestrator::from_config(&cfg, &env.registry()) {
        Err(TaskdagError::Cycle { path }) => {
            assert!(path.contains('A') && path.contains('B'), "path: {path}");
        }
        other => panic!("expected cycle error, got {other:?}"),
    }
}

#[test]
fn self_dependency_fails_construction() {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("A").depend_on("A").build())
        .build();

    assert!(matches!(
        Orchestrator::from_config(&cfg, &env.registry()),
        Err(TaskdagError::Cycle { .. })
    ));
}

#[tokio::test]
async fn failure_propagates_and_blocks_dependents() -> TestResult {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("A").fail().build())
        .with_task(TaskConfigBuilder::fake("B").depend_on("A").build())
        .with_task(TaskConfigBuilder::fake("D").build())
        .build();
    let orchestrator = Orchestrator::from_config(&cfg, &env.registry())?;

    let err = with_timeout(orchestrator.run()).await.unwrap_err();
    match err {
        TaskdagError::Run(run) => assert_eq!(run.root().task(), "A"),
        other => panic!("expected run error, got {other:?}"),
    }
    assert_eq!(env.starts("B"), 0);

    // A later single run observes the same cached failure.
    let again = with_timeout(orchestrator.run_task("A")).await.unwrap_err();
    assert!(matches!(again, TaskdagError::Run(RunError::Body { .. })));
    assert_eq!(env.starts("A"), 1);
    Ok(())
}

#[tokio::test]
async fn first_failure_cancels_cooperative_bodies() -> TestResult {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("waiter").wait_for_cancel().build())
        .with_task(TaskConfigBuilder::fake("boom").delay_ms(20).fail().build())
        .build();
    let orchestrator = Orchestrator::from_config(&cfg, &env.registry())?;

    let err = with_timeout(orchestrator.run()).await.unwrap_err();
    assert!(matches!(err, TaskdagError::Run(_)));

    // The waiter observes the cancelled token shortly after.
    with_timeout(async {
        while env.position(&Event::Cancelled("waiter".into())).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn external_cancellation_reaches_bodies() -> TestResult {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("waiter").wait_for_cancel().build())
        .build();
    let orchestrator = Orchestrator::from_config(&cfg, &env.registry())?;

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = with_timeout(orchestrator.run()).await.unwrap_err();
    assert!(matches!(err, TaskdagError::Run(RunError::Body { .. })));
    assert!(env.position(&Event::Cancelled("waiter".into())).is_some());
    Ok(())
}

#[tokio::test]
async fn concurrency_limit_caps_running_bodies() -> TestResult {
    let env = FakeEnv::new();
    let mut builder = ConfigFileBuilder::new().concurrent_limit(2);
    for i in 0..6 {
        builder = builder.with_task(TaskConfigBuilder::fake(&format!("t{i}")).delay_ms(25).build());
    }
    let orchestrator = Orchestrator::from_config(&builder.build(), &env.registry())?;
    assert_eq!(orchestrator.concurrent_limit(), 2);

    with_timeout(orchestrator.run()).await?;

    assert_eq!(env.max_concurrency(), 2);
    Ok(())
}

#[tokio::test]
async fn run_task_only_runs_the_dependency_chain() -> TestResult {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("A").build())
        .with_task(TaskConfigBuilder::fake("B").depend_on("A").build())
        .with_task(TaskConfigBuilder::fake("unrelated").build())
        .build();
    let orchestrator = Orchestrator::from_config(&cfg, &env.registry())?;

    with_timeout(orchestrator.run_task("B")).await?;

    assert_eq!(env.starts("A"), 1);
    assert_eq!(env.starts("B"), 1);
    assert_eq!(env.starts("unrelated"), 0);
    assert!(orchestrator.node("B").unwrap().is_complete());
    assert!(!orchestrator.node("unrelated").unwrap().is_complete());
    Ok(())
}

#[tokio::test]
async fn run_task_with_unknown_name_fails() -> TestResult {
    let env = FakeEnv::new();
    let orchestrator = Orchestrator::from_config(&abc(0), &env.registry())?;

    let err = orchestrator.run_task("Z").await.unwrap_err();
    assert!(matches!(err, TaskdagError::TaskNotFound(name) if name == "Z"));
    Ok(())
}

#[tokio::test]
async fn hooks_run_once_per_node_even_with_many_dependents() -> TestResult {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("root").delay_ms(10).build())
        .with_task(TaskConfigBuilder::fake("x").depend_on("root").build())
        .with_task(TaskConfigBuilder::fake("y").depend_on("root").build())
        .with_task(TaskConfigBuilder::fake("z").depend_on("root").build())
        .build();

    let pre = Arc::new(AtomicUsize::new(0));
    let post_log = Arc::new(Mutex::new(Vec::<String>::new()));

    let pre_count = pre.clone();
    let post_names = post_log.clone();
    let orchestrator = Orchestrator::builder(&env.registry())
        .pre_hook(move |_node| {
            pre_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .post_hook_for("root", move |node| {
            post_names.lock().unwrap().push(node.name().to_string());
            Ok(())
        })
        .build(&cfg)?;

    with_timeout(orchestrator.run()).await?;

    assert_eq!(pre.load(Ordering::SeqCst), 4);
    assert_eq!(*post_log.lock().unwrap(), vec!["root"]);
    assert_eq!(env.starts("root"), 1);
    Ok(())
}

#[tokio::test]
async fn failing_pre_hook_stops_task_and_dependents() -> TestResult {
    let env = FakeEnv::new();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::fake("A").build())
        .with_task(TaskConfigBuilder::fake("B").depend_on("A").build())
        .build();

    let orchestrator = Orchestrator::builder(&env.registry())
        .pre_hook_for("A", |_node| Err(anyhow!("guard refused")))
        .build(&cfg)?;

    let err = with_timeout(orchestrator.run()).await.unwrap_err();
    match err {
        TaskdagError::Run(run) => {
            assert!(matches!(run.root(), RunError::PreHook { task, .. } if task == "A"))
        }
        other => panic!("expected run error, got {other:?}"),
    }
    assert_eq!(env.starts("A"), 0);
    assert_eq!(env.starts("B"), 0);
    Ok(())
}

#[test]
fn hook_for_unknown_task_is_rejected() {
    let env = FakeEnv::new();
    let result = Orchestrator::builder(&env.registry())
        .post_hook_for("nope", |_node| Ok(()))
        .build(&abc(0));

    assert!(matches!(result, Err(TaskdagError::Config(msg)) if msg.contains("nope")));
}

#[test]
fn dot_output_lists_edges() -> TestResult {
    let env = FakeEnv::new();
    let orchestrator = Orchestrator::from_config(&abc(0), &env.registry())?;

    let dot = orchestrator.to_dot();
    assert!(dot.starts_with("digraph"));
    assert_eq!(dot.matches("->").count(), 3);
    Ok(())
}
