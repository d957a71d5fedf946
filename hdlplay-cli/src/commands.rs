//! CLI command implementations

use crate::config::PlaygroundConfig;
use anyhow::{anyhow, Context, Result};
use hdlplay_common::{share, Artifact, ArtifactKind, SharedProgram};
use hdlplay_sandbox::{ProcessEngines, RunError, RunObserver, RunOutput, RunRequest, Runner};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Echoes program output to the terminal and keeps the artifacts.
struct TerminalOutput {
    recorded: RunOutput,
}

impl RunObserver for TerminalOutput {
    fn on_stdout(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn on_stderr(&mut self, text: &str) {
        let _ = std::io::stderr().lock().write_all(text.as_bytes());
    }

    fn on_artifact(&mut self, artifact: Artifact) {
        info!(kind = %artifact.kind(), "Artifact produced");
        self.recorded.on_artifact(artifact);
    }
}

fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read program from stdin")?;
        Ok(source)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
    }
}

/// Runs a program once. Returns `false` when the program raised an error.
pub async fn execute_run(
    config: &PlaygroundConfig,
    file: &Path,
    version: Option<&str>,
    artifacts: Option<&Path>,
) -> Result<bool> {
    let catalog = config.catalog()?;
    let preset = config.preset(&catalog, version)?;
    let source = read_source(file)?;
    info!(version = %preset.name, "Running {}", file.display());

    let mut runner = Runner::new(ProcessEngines::new(config.engines.clone()));
    let request = RunRequest::new(source, preset.configuration().clone());
    let mut output = TerminalOutput {
        recorded: RunOutput::new(),
    };
    let result = runner.run(&request, &mut output).await;
    runner.terminate();

    if let Some(dir) = artifacts {
        write_artifacts(dir, &output.recorded)?;
    }

    match result {
        Ok(()) => Ok(true),
        Err(RunError::Evaluation(message)) => {
            eprintln!("{}", message);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Writes the last artifact of each kind into `dir`.
fn write_artifacts(dir: &Path, output: &RunOutput) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    for kind in [ArtifactKind::Rtlil, ArtifactKind::Verilog, ArtifactKind::Waveform] {
        let Some(artifact) = output.artifact(kind) else {
            continue;
        };
        let (name, contents) = match artifact {
            Artifact::Rtlil(code) => ("design.il", code.clone()),
            Artifact::Verilog(code) => ("design.v", code.clone()),
            Artifact::Waveform(tree) => ("waveforms.json", serde_json::to_string_pretty(tree)?),
        };
        let path = dir.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "Artifact written");
    }
    Ok(())
}

/// Lists catalog versions, marking the default.
pub fn execute_versions(config: &PlaygroundConfig) -> Result<()> {
    let catalog = config.catalog()?;
    let default = config.preset(&catalog, None)?;

    for preset in catalog.presets() {
        let marker = if preset.name == default.name { "*" } else { " " };
        println!(
            "{} {:<10} {} packages",
            marker,
            preset.name,
            preset.configuration().len()
        );
    }
    Ok(())
}

pub fn execute_demo(config: &PlaygroundConfig, version: Option<&str>) -> Result<()> {
    let catalog = config.catalog()?;
    let preset = config.preset(&catalog, version)?;
    let demo = preset
        .demo
        .as_deref()
        .ok_or_else(|| anyhow!("Version {} has no demo program", preset.name))?;
    print!("{}", demo);
    Ok(())
}

pub fn execute_share(
    config: &PlaygroundConfig,
    file: &Path,
    version: Option<&str>,
    base: Option<&str>,
) -> Result<()> {
    let catalog = config.catalog()?;
    let preset = config.preset(&catalog, version)?;
    let program = SharedProgram::new(preset.name.clone(), read_source(file)?);
    let url = share::share_url(base.unwrap_or(&config.share_base), &program)?;
    println!("{}", url);
    Ok(())
}

pub fn execute_open(link: &str) -> Result<()> {
    let program = share::decode(link)?;
    println!(
        "# version: {}",
        program.version.as_deref().unwrap_or("(default)")
    );
    print!("{}", program.source.unwrap_or_default());
    Ok(())
}
