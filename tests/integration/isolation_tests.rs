//! Per-run namespaces inside one sandbox

use assert_matches::assert_matches;
use hdlplay_common::{Artifact, ArtifactKind};
use hdlplay_sandbox::RunError;
use hdlplay_tests::common::{configuration, Harness};

#[tokio::test]
async fn test_variables_do_not_leak_between_runs() {
    let mut harness = Harness::new();
    let config = configuration(&[]);

    let (output, result) = harness.run("let counter = 1\nprint $counter", &config).await;
    result.unwrap();
    assert_eq!(output.stdout(), "1\n");

    let (_, result) = harness.run("print $counter", &config).await;
    assert_matches!(
        result,
        Err(RunError::Evaluation(message)) if message == "NameError: name 'counter' is not defined"
    );

    let journal = harness.engines.journal();
    assert_eq!(journal.interpreters_created, 1);
    assert_eq!(journal.namespaces_created, 2);
    assert_eq!(journal.namespaces_released, 2);
}

#[tokio::test]
async fn test_namespace_released_after_failure() {
    let mut harness = Harness::new();
    let config = configuration(&[]);

    let (_, result) = harness.run("let x = 1\nraise RuntimeError: boom", &config).await;
    assert!(result.is_err());
    let journal = harness.engines.journal();
    assert_eq!(journal.namespaces_created, journal.namespaces_released);
}

#[tokio::test]
async fn test_deferred_side_effects_are_cut_off() {
    let mut harness = Harness::new();
    let config = configuration(&[]);

    let (output, result) = harness
        .run(
            "defer show_verilog module late;\ndefer print late\nshow_rtlil module early",
            &config,
        )
        .await;
    result.unwrap();
    assert_eq!(output.events.len(), 1);
    assert_eq!(
        output.artifact(ArtifactKind::Rtlil),
        Some(&Artifact::Rtlil("module early".into()))
    );

    // Nothing from the previous run shows up in the next one either
    let (output, result) = harness.run("print next", &config).await;
    result.unwrap();
    assert_eq!(output.stdout(), "next\n");
    assert!(output.artifacts().next().is_none());
}

#[tokio::test]
async fn test_partial_line_flushed_at_end_of_run() {
    let mut harness = Harness::new();
    let (output, result) = harness
        .run("write no newline", &configuration(&[]))
        .await;
    result.unwrap();
    assert_eq!(output.stdout(), "no newline");
}
