//! Streaming of output and artifacts from the sandbox to the caller

use hdlplay_common::{Artifact, ArtifactKind, NodeType, SandboxMessage, WaveValue};
use hdlplay_sandbox::{RunError, RunEvent};
use hdlplay_tests::common::{configuration, Harness};

const COUNTER_VCD: &str = "\
$timescale 1 ns $end
$scope module top $end
$var wire 2 ! count $end
$upscope $end
$enddefinitions $end
#0
$dumpvars
b0 !
$end
#1
b1 !";

#[tokio::test]
async fn test_callbacks_follow_emission_order() {
    let mut harness = Harness::new();
    let (output, result) = harness
        .run(
            "print A\nshow_verilog module top;\neprint B",
            &configuration(&[]),
        )
        .await;
    result.unwrap();

    assert_eq!(
        output.events,
        vec![
            RunEvent::Stdout("A\n".into()),
            RunEvent::Artifact(Artifact::Verilog("module top;".into())),
            RunEvent::Stderr("B\n".into()),
        ]
    );
}

#[tokio::test]
async fn test_interleaved_streams_keep_order() {
    let mut harness = Harness::new();
    let (output, result) = harness
        .run(
            "eprint 1\nprint 2\nwrite 3\neprint 4\nshow_rtlil r\nprint 5",
            &configuration(&[]),
        )
        .await;
    result.unwrap();

    assert_eq!(
        output.events,
        vec![
            RunEvent::Stderr("1\n".into()),
            RunEvent::Stdout("2\n".into()),
            RunEvent::Stdout("3".into()),
            RunEvent::Stderr("4\n".into()),
            RunEvent::Artifact(Artifact::Rtlil("r".into())),
            RunEvent::Stdout("5\n".into()),
        ]
    );
}

#[tokio::test]
async fn test_waveform_tree_from_vcd() {
    let mut harness = Harness::new();
    let source = format!("print simulating\nshow_vcd\n{}", COUNTER_VCD);
    let (output, result) = harness.run(&source, &configuration(&[])).await;
    result.unwrap();

    let Some(Artifact::Waveform(tree)) = output.artifact(ArtifactKind::Waveform) else {
        panic!("no waveform in {:?}", output.events);
    };
    assert_eq!(tree.name(), "top");
    assert_eq!(tree.node_type(), &NodeType::scope());
    assert_eq!(tree.children().len(), 1);

    let count = &tree.children()[0];
    assert_eq!(count.name(), "count");
    assert_eq!(
        count.data(),
        &[
            (0, WaveValue::Text("00".into())),
            (1, WaveValue::Text("01".into()))
        ]
    );

    let json = serde_json::to_value(SandboxMessage::Artifact(Artifact::Waveform(tree.clone()))).unwrap();
    assert_eq!(json["payload"]["children"][0]["data"], serde_json::json!([[0, "00"], [1, "01"]]));
}

#[tokio::test]
async fn test_bad_waveform_fails_the_run() {
    let mut harness = Harness::new();
    let (_, result) = harness
        .run("show_vcd\n#0\nb1 ?", &configuration(&[]))
        .await;
    match result {
        Err(RunError::Evaluation(message)) => assert!(message.contains("undeclared identifier")),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_synthesis_hook_reaches_engine() {
    let mut harness = Harness::new();
    let (output, result) = harness
        .run("synth -q -p proc", &configuration(&[]))
        .await;
    result.unwrap();

    assert_eq!(output.stdout(), "synthesized: -q -p proc\n");
    assert_eq!(
        harness.engines.journal().synthesis_calls,
        vec![vec!["-q".to_string(), "-p".to_string(), "proc".to_string()]]
    );
}

#[tokio::test]
async fn test_synthesis_failure_is_an_evaluation_error() {
    let mut harness = Harness::new();
    let config = configuration(&[]);
    let (_, result) = harness.run("synth --fail", &config).await;
    match result {
        Err(RunError::Evaluation(message)) => assert!(message.contains("synthesis aborted")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(harness.runner.state_name(), "ready");
}
