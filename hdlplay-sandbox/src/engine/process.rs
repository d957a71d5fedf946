//! Process-backed engines
//!
//! Every evaluation runs in a fresh interpreter process with its own scratch
//! directory, so a namespace is a process. Program output and hook calls
//! reach the host as control lines on the child's stdout, in the order the
//! program produced them. Requests that need an answer (synthesis, waveform
//! files) are answered on the child's stdin.
//!
//! The shim ends every evaluation with a `done` or `error` line. The child is
//! killed as soon as that line is read, so nothing the program left running
//! can reach the hooks afterwards.

use super::{EngineLoader, Interpreter, NamespaceId, SynthesisOutput, Synthesizer};
use crate::bridge::HookBridge;
use crate::error::EvaluationError;
use anyhow::{bail, Context};
use async_trait::async_trait;
use hdlplay_common::{Locator, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;

const CONTROL_PREFIX: &str = "\x1ehdlplay:";

const SHIM_FILES: &[(&str, &str)] = &[
    ("_hdlplay_channel.py", include_str!("shim/_hdlplay_channel.py")),
    ("_hdlplay_bootstrap.py", include_str!("shim/_hdlplay_bootstrap.py")),
    ("amaranth_playground.py", include_str!("shim/amaranth_playground.py")),
    ("js.py", include_str!("shim/js.py")),
];

/// Programs used by the process engines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Python interpreter
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Yosys binary
    #[serde(default = "default_synthesizer")]
    pub synthesizer: String,

    /// Download cache shared between sandboxes. Packages are always
    /// installed into a directory owned by one sandbox.
    #[serde(default)]
    pub package_dir: Option<PathBuf>,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_synthesizer() -> String {
    "yosys".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            synthesizer: default_synthesizer(),
            package_dir: None,
        }
    }
}

/// Loader for [`ProcessInterpreter`] and [`ProcessSynthesizer`]
#[derive(Debug, Clone, Default)]
pub struct ProcessEngines {
    settings: EngineSettings,
}

impl ProcessEngines {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

#[async_trait(?Send)]
impl EngineLoader for ProcessEngines {
    async fn load_interpreter(
        &self,
        hooks: Rc<HookBridge>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Box<dyn Interpreter>> {
        let interpreter = ProcessInterpreter::start(&self.settings, hooks, shutdown).await?;
        Ok(Box::new(interpreter))
    }

    async fn load_synthesizer(&self) -> anyhow::Result<Rc<dyn Synthesizer>> {
        let synthesizer = ProcessSynthesizer::start(&self.settings.synthesizer).await?;
        Ok(Rc::new(synthesizer))
    }
}

/// Runs a program with one flag and returns the first line it printed.
async fn probe(program: &str, flag: &str) -> crate::Result<String> {
    let output = Command::new(program)
        .arg(flag)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to start {}", program))?;
    if !output.status.success() {
        bail!("{} {} exited with {}", program, flag, output.status);
    }
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&text)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Control line sent by the shim
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ControlOp {
    Write {
        stream: Stream,
        text: String,
    },
    Rtlil {
        code: String,
    },
    Verilog {
        code: String,
    },
    Waveforms {
        path: PathBuf,
    },
    Synth {
        args: Vec<String>,
        #[serde(default)]
        stdin: String,
    },
    Error {
        message: String,
    },
    Done,
}

/// Whether the evaluation is still producing control lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
}

/// Python interpreter running one child process per evaluation
pub struct ProcessInterpreter {
    program: String,
    hooks: Rc<HookBridge>,
    shutdown: CancellationToken,
    scratch: TempDir,
    package_dir: PathBuf,
    download_cache: Option<PathBuf>,
    installed: Vec<Locator>,
    namespaces: HashMap<u64, TempDir>,
    next_namespace: u64,
}

impl ProcessInterpreter {
    pub async fn start(
        settings: &EngineSettings,
        hooks: Rc<HookBridge>,
        shutdown: CancellationToken,
    ) -> crate::Result<Self> {
        let version = probe(&settings.interpreter, "--version").await?;
        tracing::info!(program = %settings.interpreter, %version, "Interpreter found");

        let scratch = tempfile::Builder::new()
            .prefix("hdlplay-")
            .tempdir()
            .context("failed to create scratch directory")?;
        let shim_dir = scratch.path().join("shim");
        tokio::fs::create_dir_all(&shim_dir).await?;
        for (name, contents) in SHIM_FILES {
            tokio::fs::write(shim_dir.join(name), contents)
                .await
                .with_context(|| format!("failed to write {}", name))?;
        }

        let package_dir = scratch.path().join("packages");
        tokio::fs::create_dir_all(&package_dir).await?;
        if let Some(cache) = &settings.package_dir {
            tokio::fs::create_dir_all(cache)
                .await
                .with_context(|| format!("failed to create {}", cache.display()))?;
        }

        Ok(Self {
            program: settings.interpreter.clone(),
            hooks,
            shutdown,
            scratch,
            package_dir,
            download_cache: settings.package_dir.clone(),
            installed: Vec::new(),
            namespaces: HashMap::new(),
            next_namespace: 0,
        })
    }

    fn search_path(&self) -> crate::Result<std::ffi::OsString> {
        let paths = [self.scratch.path().join("shim"), self.package_dir.clone()];
        std::env::join_paths(paths).context("invalid package directory")
    }

    async fn install(&self, locator: &Locator) -> crate::Result<()> {
        tracing::debug!(%locator, target = %self.package_dir.display(), "Installing package");
        let mut command = Command::new(&self.program);
        command
            .args(["-m", "pip", "install", "--quiet", "--no-deps", "--upgrade"])
            .arg("--disable-pip-version-check")
            .arg("--target")
            .arg(&self.package_dir);
        if let Some(cache) = &self.download_cache {
            command.arg("--cache-dir").arg(cache);
        }
        command
            .arg(locator.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = self.shutdown.cancelled() => bail!("sandbox terminated"),
            output = command.output() => output.with_context(|| format!("failed to run {}", self.program))?,
        };
        if !output.status.success() {
            bail!(
                "installing {} failed: {}",
                locator.file_name(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Handles one line from the child's stdout.
    async fn handle_line(
        &self,
        line: &str,
        replies: &mut Option<ChildStdin>,
        failure: &mut Option<String>,
    ) -> Flow {
        let Some(payload) = line.strip_prefix(CONTROL_PREFIX) else {
            self.hooks.write_line(Stream::Stdout, line);
            return Flow::Continue;
        };
        let op = match serde_json::from_str::<ControlOp>(payload) {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed control line");
                self.hooks.write_line(Stream::Stdout, line);
                return Flow::Continue;
            }
        };

        match op {
            ControlOp::Write { stream, text } => self.hooks.write(stream, &text),
            ControlOp::Rtlil { code } => self.hooks.show_rtlil(code),
            ControlOp::Verilog { code } => self.hooks.show_verilog(code),
            ControlOp::Waveforms { path } => {
                let reply = match self.show_waveform_file(&path).await {
                    Ok(()) => json!({ "ok": true }),
                    Err(e) => json!({ "error": format!("{:#}", e) }),
                };
                reply_to(replies, reply).await;
            }
            ControlOp::Synth { args, stdin } => {
                let reply = match self.hooks.run_synthesis(&args, stdin.as_bytes()) {
                    Ok(output) => json!({
                        "exit_code": output.exit_code,
                        "stdout": output.stdout,
                        "stderr": output.stderr,
                    }),
                    Err(e) => json!({ "error": format!("{:#}", e) }),
                };
                reply_to(replies, reply).await;
            }
            ControlOp::Error { message } => {
                *failure = Some(message);
                return Flow::Finished;
            }
            ControlOp::Done => return Flow::Finished,
        }
        Flow::Continue
    }

    async fn show_waveform_file(&self, path: &Path) -> crate::Result<()> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.hooks.show_vcd(&text)?;
        Ok(())
    }
}

async fn reply_to(replies: &mut Option<ChildStdin>, reply: serde_json::Value) {
    let Some(stdin) = replies.as_mut() else {
        tracing::warn!("Interpreter stdin is closed, reply dropped");
        return;
    };
    let mut line = reply.to_string();
    line.push('\n');
    if let Err(e) = stdin.write_all(line.as_bytes()).await {
        tracing::warn!(error = %e, "Failed to answer interpreter");
        return;
    }
    if let Err(e) = stdin.flush().await {
        tracing::warn!(error = %e, "Failed to answer interpreter");
    }
}

#[async_trait(?Send)]
impl Interpreter for ProcessInterpreter {
    fn name(&self) -> &str {
        "process"
    }

    async fn load_packages(&mut self, locators: &[Locator]) -> anyhow::Result<()> {
        for locator in locators {
            if self.installed.contains(locator) {
                tracing::debug!(%locator, "Package already installed");
                continue;
            }
            self.install(locator).await?;
            self.installed.push(locator.clone());
        }
        Ok(())
    }

    fn create_namespace(&mut self) -> anyhow::Result<NamespaceId> {
        let dir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(self.scratch.path())
            .context("failed to create run directory")?;
        let id = self.next_namespace;
        self.next_namespace += 1;
        self.namespaces.insert(id, dir);
        Ok(NamespaceId(id))
    }

    async fn evaluate(
        &mut self,
        namespace: NamespaceId,
        source: &str,
    ) -> Result<(), EvaluationError> {
        let workdir = self
            .namespaces
            .get(&namespace.0)
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| EvaluationError::new(format!("unknown namespace {}", namespace)))?;
        let program = workdir.join("program.py");
        tokio::fs::write(&program, source)
            .await
            .map_err(|e| EvaluationError::new(format!("failed to write program: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(["-u", "-m", "_hdlplay_bootstrap"])
            .arg(&program)
            .current_dir(&workdir)
            .env("PYTHONPATH", self.search_path()?)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("HOME", &workdir)
            .env("AMARANTH_USE_YOSYS", "javascript")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EvaluationError::new(format!("failed to start {}: {}", self.program, e)))?;

        let mut replies = child.stdin.take();
        let mut control = child.stdout.take().map(|out| BufReader::new(out).lines());
        let mut errors = child.stderr.take().map(|err| BufReader::new(err).lines());
        let mut failure = None;
        let mut finished = false;

        while !finished && (control.is_some() || errors.is_some()) {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = child.kill().await;
                    return Err(EvaluationError::new("interpreter terminated"));
                }
                line = next_line(&mut control) => match line {
                    Some(line) => {
                        let flow = self.handle_line(&line, &mut replies, &mut failure).await;
                        finished = flow == Flow::Finished;
                    }
                    None => control = None,
                },
                line = next_line(&mut errors) => match line {
                    Some(line) => self.hooks.write_line(Stream::Stderr, &line),
                    None => errors = None,
                },
            }
        }

        if finished {
            // Threads and exit handlers the program started die with it
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "Interpreter already exited");
            }
            return match failure {
                Some(message) => Err(EvaluationError::new(message)),
                None => Ok(()),
            };
        }

        // Stdout closed without a final control line
        let status = child
            .wait()
            .await
            .map_err(|e| EvaluationError::new(format!("failed to wait for interpreter: {}", e)))?;
        Err(EvaluationError::new(format!(
            "interpreter exited with {} before the program finished",
            status
        )))
    }

    fn release_namespace(&mut self, namespace: NamespaceId) {
        if let Some(dir) = self.namespaces.remove(&namespace.0) {
            if let Err(e) = dir.close() {
                tracing::warn!(%namespace, error = %e, "Failed to remove run directory");
            }
        }
    }
}

/// Next line of an open reader; pends forever once the reader is closed.
async fn next_line<R>(reader: &mut Option<tokio::io::Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match reader {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => futures::future::pending().await,
    }
}

/// Yosys invoked as a child process per call
#[derive(Debug)]
pub struct ProcessSynthesizer {
    program: String,
    version: String,
}

impl ProcessSynthesizer {
    pub async fn start(program: &str) -> crate::Result<Self> {
        let version = probe(program, "-V").await?;
        tracing::info!(%program, %version, "Synthesizer found");
        Ok(Self {
            program: program.to_string(),
            version,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Synthesizer for ProcessSynthesizer {
    fn name(&self) -> &str {
        "yosys"
    }

    fn run(&self, argv: &[String], stdin: &[u8]) -> anyhow::Result<SynthesisOutput> {
        let mut child = std::process::Command::new(&self.program)
            .args(argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;

        let input = child.stdin.take();
        let output = std::thread::scope(|scope| {
            // Feed stdin from a second thread so a chatty tool cannot
            // deadlock on a full stdout pipe
            let writer = scope.spawn(move || match input {
                Some(mut pipe) => pipe.write_all(stdin),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            match writer.join() {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    tracing::warn!(error = %e, "Failed to write synthesizer input")
                }
                _ => {}
            }
            output
        })
        .with_context(|| format!("failed to wait for {}", self.program))?;

        Ok(SynthesisOutput {
            exit_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
