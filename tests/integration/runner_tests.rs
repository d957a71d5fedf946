//! Sandbox lifecycle as seen through the runner

use assert_matches::assert_matches;
use hdlplay_common::Configuration;
use hdlplay_sandbox::testing::ScriptEngines;
use hdlplay_sandbox::RunError;
use hdlplay_tests::common::{configuration, wheel, Harness};
use std::time::Duration;

#[tokio::test]
async fn test_configuration_change_restarts_sandbox() {
    let mut harness = Harness::new();
    let c1 = configuration(&[("pyvcd", "0.4.1"), ("amaranth", "0.5.3")]);
    let c2 = configuration(&[("pyvcd", "0.4.1"), ("amaranth", "0.4.2")]);

    let (_, result) = harness.run("print one", &c1).await;
    result.unwrap();
    let first = harness.runner.sandbox_id().unwrap();

    let (_, result) = harness.run("print two", &c2).await;
    result.unwrap();
    let second = harness.runner.sandbox_id().unwrap();

    assert_ne!(first, second);
    let journal = harness.engines.journal();
    assert_eq!(journal.interpreters_created, 2);
    assert_eq!(
        journal.loads,
        vec![c1.locators().to_vec(), c2.locators().to_vec()]
    );
    assert_eq!(harness.runner.configuration(), Some(&c2));
}

#[tokio::test]
async fn test_order_of_locators_matters() {
    let mut harness = Harness::new();
    let forward = configuration(&[("a", "1"), ("b", "1")]);
    let backward = configuration(&[("b", "1"), ("a", "1")]);

    harness.run("print x", &forward).await.1.unwrap();
    harness.run("print x", &backward).await.1.unwrap();
    assert_eq!(harness.engines.journal().loads.len(), 2);
}

#[tokio::test]
async fn test_same_configuration_loads_once() {
    let mut harness = Harness::new();
    let config = configuration(&[("amaranth", "0.5.3")]);

    let mut sandboxes = Vec::new();
    for i in 0..4 {
        let (output, result) = harness.run(&format!("print run {}", i), &config).await;
        result.unwrap();
        assert_eq!(output.stdout(), format!("run {}\n", i));
        sandboxes.push(harness.runner.sandbox_id());
    }

    sandboxes.dedup();
    assert_eq!(sandboxes.len(), 1);
    assert_eq!(harness.engines.journal().loads.len(), 1);
    assert_eq!(harness.runner.state_name(), "ready");
}

#[tokio::test]
async fn test_equal_configurations_built_separately_are_reused() {
    let mut harness = Harness::new();
    harness
        .run("print a", &configuration(&[("amaranth", "0.5.3")]))
        .await
        .1
        .unwrap();
    harness
        .run("print b", &Configuration::new([wheel("amaranth", "0.5.3")]))
        .await
        .1
        .unwrap();
    assert_eq!(harness.engines.journal().loads.len(), 1);
}

#[tokio::test]
async fn test_evaluation_error_is_reported_verbatim_and_sandbox_reused() {
    let mut harness = Harness::new();
    let config = configuration(&[]);

    let (output, result) = harness
        .run("print before\nraise ZeroDivisionError: division by zero", &config)
        .await;
    assert_eq!(output.stdout(), "before\n");
    assert_matches!(
        result,
        Err(RunError::Evaluation(message)) if message == "ZeroDivisionError: division by zero"
    );
    let sandbox = harness.runner.sandbox_id();

    let (output, result) = harness.run("print after", &config).await;
    result.unwrap();
    assert_eq!(output.stdout(), "after\n");
    assert_eq!(harness.runner.sandbox_id(), sandbox);
    assert_eq!(harness.engines.journal().interpreters_created, 1);
}

#[tokio::test]
async fn test_load_settles_before_execute() {
    let engines = ScriptEngines::new().with_load_delay(Duration::from_millis(100));
    let mut harness = Harness::with_engines(engines);
    let config = configuration(&[("amaranth", "0.5.3")]);

    let (output, result) = harness.run("import amaranth\nprint imported", &config).await;
    result.unwrap();
    assert_eq!(output.stdout(), "imported\n");
}

#[tokio::test]
async fn test_packages_do_not_survive_restart() {
    let mut harness = Harness::new();
    let with_vcd = configuration(&[("pyvcd", "0.4.1")]);
    let without = configuration(&[("amaranth", "0.5.3")]);

    harness.run("import pyvcd", &with_vcd).await.1.unwrap();
    let (_, result) = harness.run("import pyvcd", &without).await;
    assert_matches!(
        result,
        Err(RunError::Evaluation(message)) if message == "ModuleNotFoundError: No module named 'pyvcd'"
    );
}

#[tokio::test]
async fn test_crash_forces_recreation() {
    let mut harness = Harness::new();
    let config = configuration(&[("amaranth", "0.5.3")]);

    harness.run("print warmup", &config).await.1.unwrap();
    let crashed = harness.runner.sandbox_id();

    let (_, result) = harness.run("print going down\ncrash", &config).await;
    assert_matches!(result, Err(RunError::Transport(_)));
    assert_eq!(harness.runner.state_name(), "absent");

    let (output, result) = harness.run("print back", &config).await;
    result.unwrap();
    assert_eq!(output.stdout(), "back\n");
    assert_ne!(harness.runner.sandbox_id(), crashed);

    let journal = harness.engines.journal();
    assert_eq!(journal.interpreters_created, 2);
    assert_eq!(journal.loads.len(), 2);
}

#[tokio::test]
async fn test_failed_preload_is_a_transport_error() {
    let engines = ScriptEngines::new().with_interpreter_failure("interpreter wheel missing");
    let mut harness = Harness::with_engines(engines);

    let (_, result) = harness.run("print never", &configuration(&[])).await;
    assert_matches!(
        result,
        Err(RunError::Transport(message)) if message.contains("interpreter wheel missing")
    );
    assert!(harness.runner.sandbox_id().is_none());
}

#[tokio::test]
async fn test_failed_package_load_is_a_transport_error() {
    let engines = ScriptEngines::new().with_load_failure();
    let mut harness = Harness::with_engines(engines);

    let (_, result) = harness
        .run("print never", &configuration(&[("amaranth", "0.5.3")]))
        .await;
    assert_matches!(result, Err(RunError::Transport(message)) if message.contains("failed to load packages"));
    assert_eq!(harness.runner.state_name(), "absent");
}

#[tokio::test]
async fn test_deadline_imposed_by_caller() {
    let mut harness = Harness::new();
    let config = configuration(&[]);

    let deadline = tokio::time::timeout(
        Duration::from_millis(100),
        harness.run("print started\nsleep 10000", &config),
    )
    .await;
    assert!(deadline.is_err());

    let (output, result) = harness.run("print recovered", &config).await;
    result.unwrap();
    assert_eq!(output.stdout(), "recovered\n");
    assert_eq!(harness.engines.journal().interpreters_created, 2);
}

#[tokio::test]
async fn test_prepare_preloads_without_running() {
    let mut harness = Harness::new();
    let config = configuration(&[("amaranth", "0.5.3")]);

    let id = harness.runner.prepare(&config).unwrap();
    assert_eq!(harness.runner.state_name(), "loading");

    harness.run("import amaranth", &config).await.1.unwrap();
    assert_eq!(harness.runner.sandbox_id(), Some(id));
    assert_eq!(harness.engines.journal().loads.len(), 1);
    assert_eq!(harness.engines.journal().namespaces_created, 1);

    harness.runner.terminate();
    assert!(harness.runner.configuration().is_none());
}
