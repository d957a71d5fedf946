//! Runs a few programs through process engines and prints what they produce
//!
//! Needs `python3` on the PATH. Synthesis additionally needs `yosys`.

use hdlplay_common::{Artifact, Configuration};
use hdlplay_sandbox::{EngineSettings, ProcessEngines, RunError, RunObserver, RunRequest, Runner};

struct Printer;

impl RunObserver for Printer {
    fn on_stdout(&mut self, text: &str) {
        print!("  stdout: {}", text);
    }

    fn on_stderr(&mut self, text: &str) {
        print!("  stderr: {}", text);
    }

    fn on_artifact(&mut self, artifact: Artifact) {
        println!("  artifact: {}", artifact.kind());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut runner = Runner::new(ProcessEngines::new(EngineSettings::default()));
    let configuration = Configuration::empty();

    println!("=== Sandbox Runner Example ===\n");

    println!("Example 1: Output on both streams");
    let request = RunRequest::new(
        "import sys\nprint('hello from the sandbox')\nprint('careful', file=sys.stderr)",
        configuration.clone(),
    );
    run_and_print(&mut runner, &request).await?;

    println!("\nExample 2: Variables do not survive a run");
    let request = RunRequest::new("counter = 1", configuration.clone());
    run_and_print(&mut runner, &request).await?;
    let request = RunRequest::new("print(counter)", configuration.clone());
    run_and_print(&mut runner, &request).await?;

    println!("\nExample 3: Artifacts");
    let request = RunRequest::new(
        "import amaranth_playground\namaranth_playground.show_verilog('module top; endmodule')",
        configuration,
    );
    run_and_print(&mut runner, &request).await?;

    println!("\nSandbox {:?} is {}", runner.sandbox_id(), runner.state_name());
    Ok(())
}

async fn run_and_print(runner: &mut Runner, request: &RunRequest) -> anyhow::Result<()> {
    match runner.run(request, &mut Printer).await {
        Ok(()) => println!("  Result: ok"),
        Err(RunError::Evaluation(message)) => println!("  Error:\n{}", message),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
