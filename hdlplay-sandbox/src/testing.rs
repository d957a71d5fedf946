//! Deterministic scripted engines for tests
//!
//! Programs are line oriented:
//!
//! ```text
//! let NAME = TEXT        define a variable in the run's namespace
//! print TEXT             stdout line, `$NAME` is substituted
//! eprint TEXT            stderr line
//! write TEXT             stdout text without newline
//! show_rtlil TEXT        emit an rtlil artifact
//! show_verilog TEXT      emit a verilog artifact
//! show_vcd               the rest of the program is VCD text for a waveform
//! import PKG             fails unless a loaded locator provides PKG
//! raise MESSAGE          fail the run with exactly MESSAGE
//! synth ARGS             call the synthesis hook, print its stdout
//! sleep MS               suspend the evaluation
//! defer COMMAND          run COMMAND when the namespace is released
//! crash                  panic the sandbox thread
//! ```

use crate::bridge::HookBridge;
use crate::engine::{EngineLoader, Interpreter, NamespaceId, SynthesisOutput, Synthesizer};
use crate::error::EvaluationError;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use hdlplay_common::{Locator, Stream};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the scripted engines were asked to do
#[derive(Debug, Clone, Default)]
pub struct Journal {
    pub interpreters_created: usize,
    pub synthesizers_created: usize,
    /// Locators of every `load_packages` call, in order
    pub loads: Vec<Vec<Locator>>,
    pub namespaces_created: usize,
    pub namespaces_released: usize,
    pub synthesis_calls: Vec<Vec<String>>,
}

/// Engine loader producing [`ScriptInterpreter`] and [`ScriptSynthesizer`]
///
/// Clones share one journal, so a test can keep a clone after handing the
/// loader to a runner.
#[derive(Debug, Clone, Default)]
pub struct ScriptEngines {
    journal: Arc<Mutex<Journal>>,
    load_delay: Duration,
    interpreter_failure: Option<String>,
    fail_loads: bool,
}

impl ScriptEngines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `load_packages` call.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Makes interpreter preloading fail with this message.
    pub fn with_interpreter_failure(mut self, message: impl Into<String>) -> Self {
        self.interpreter_failure = Some(message.into());
        self
    }

    /// Makes every `load_packages` call fail.
    pub fn with_load_failure(mut self) -> Self {
        self.fail_loads = true;
        self
    }

    /// Snapshot of the journal.
    pub fn journal(&self) -> Journal {
        self.lock().clone()
    }

    fn record(&self, update: impl FnOnce(&mut Journal)) {
        update(&mut self.lock());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait(?Send)]
impl EngineLoader for ScriptEngines {
    async fn load_interpreter(
        &self,
        hooks: Rc<HookBridge>,
        _shutdown: CancellationToken,
    ) -> anyhow::Result<Box<dyn Interpreter>> {
        if let Some(message) = &self.interpreter_failure {
            bail!("{}", message);
        }
        self.record(|journal| journal.interpreters_created += 1);
        Ok(Box::new(ScriptInterpreter {
            engines: self.clone(),
            hooks,
            loaded: Vec::new(),
            namespaces: HashMap::new(),
            next_namespace: 0,
        }))
    }

    async fn load_synthesizer(&self) -> anyhow::Result<Rc<dyn Synthesizer>> {
        self.record(|journal| journal.synthesizers_created += 1);
        Ok(Rc::new(ScriptSynthesizer {
            engines: self.clone(),
        }))
    }
}

#[derive(Default)]
struct Namespace {
    variables: HashMap<String, String>,
    deferred: Vec<String>,
}

pub struct ScriptInterpreter {
    engines: ScriptEngines,
    hooks: Rc<HookBridge>,
    loaded: Vec<Locator>,
    namespaces: HashMap<u64, Namespace>,
    next_namespace: u64,
}

#[async_trait(?Send)]
impl Interpreter for ScriptInterpreter {
    fn name(&self) -> &str {
        "script"
    }

    async fn load_packages(&mut self, locators: &[Locator]) -> anyhow::Result<()> {
        if !self.engines.load_delay.is_zero() {
            tokio::time::sleep(self.engines.load_delay).await;
        }
        self.engines.record(|journal| journal.loads.push(locators.to_vec()));
        if self.engines.fail_loads {
            bail!("failed to fetch {} packages", locators.len());
        }
        for locator in locators {
            if !self.loaded.contains(locator) {
                self.loaded.push(locator.clone());
            }
        }
        Ok(())
    }

    fn create_namespace(&mut self) -> anyhow::Result<NamespaceId> {
        let id = self.next_namespace;
        self.next_namespace += 1;
        self.namespaces.insert(id, Namespace::default());
        self.engines.record(|journal| journal.namespaces_created += 1);
        Ok(NamespaceId(id))
    }

    async fn evaluate(
        &mut self,
        namespace: NamespaceId,
        source: &str,
    ) -> Result<(), EvaluationError> {
        let hooks = Rc::clone(&self.hooks);
        let loaded = &self.loaded;
        let namespace = self
            .namespaces
            .get_mut(&namespace.0)
            .ok_or_else(|| EvaluationError::new(format!("unknown namespace {}", namespace)))?;

        let mut lines = source.lines();
        while let Some(line) = lines.next() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "let" => {
                    let (name, value) = rest
                        .split_once('=')
                        .ok_or_else(|| EvaluationError::new(format!("SyntaxError: {}", line)))?;
                    let value = expand(value.trim(), &namespace.variables)?;
                    namespace.variables.insert(name.trim().to_string(), value);
                }
                "print" => hooks.write_line(Stream::Stdout, &expand(rest, &namespace.variables)?),
                "eprint" => hooks.write_line(Stream::Stderr, &expand(rest, &namespace.variables)?),
                "write" => hooks.write(Stream::Stdout, &expand(rest, &namespace.variables)?),
                "show_rtlil" => hooks.show_rtlil(expand(rest, &namespace.variables)?),
                "show_verilog" => hooks.show_verilog(expand(rest, &namespace.variables)?),
                "show_vcd" => {
                    let document: Vec<&str> = lines.by_ref().collect();
                    hooks
                        .show_vcd(&document.join("\n"))
                        .map_err(|e| EvaluationError::new(format!("ValueError: {}", e)))?;
                }
                "import" => {
                    if !loaded.iter().any(|locator| locator.package_name() == rest) {
                        return Err(EvaluationError::new(format!(
                            "ModuleNotFoundError: No module named '{}'",
                            rest
                        )));
                    }
                }
                "raise" => return Err(EvaluationError::new(rest)),
                "synth" => {
                    let argv: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
                    let output = hooks
                        .run_synthesis(&argv, b"")
                        .map_err(|e| EvaluationError::new(format!("RuntimeError: {:#}", e)))?;
                    hooks.write(Stream::Stdout, &output.stdout);
                }
                "sleep" => {
                    let millis: u64 = rest
                        .parse()
                        .map_err(|_| EvaluationError::new(format!("SyntaxError: {}", line)))?;
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                }
                "defer" => namespace.deferred.push(rest.to_string()),
                "crash" => panic!("scripted crash"),
                other => {
                    return Err(EvaluationError::new(format!(
                        "SyntaxError: unknown command '{}'",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    fn release_namespace(&mut self, namespace: NamespaceId) {
        let Some(released) = self.namespaces.remove(&namespace.0) else {
            return;
        };
        for command in released.deferred {
            let (command, rest) = command.split_once(' ').unwrap_or((command.as_str(), ""));
            match command {
                "print" => self.hooks.write_line(Stream::Stdout, rest),
                "eprint" => self.hooks.write_line(Stream::Stderr, rest),
                "show_rtlil" => self.hooks.show_rtlil(rest),
                "show_verilog" => self.hooks.show_verilog(rest),
                _ => tracing::debug!(command, "Ignoring deferred command"),
            }
        }
        self.engines.record(|journal| journal.namespaces_released += 1);
    }
}

/// Replaces `$NAME` with the variable's value.
fn expand(text: &str, variables: &HashMap<String, String>) -> Result<String, EvaluationError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if end == 0 {
            out.push('$');
            rest = after;
            continue;
        }
        let name = &after[..end];
        let value = variables.get(name).ok_or_else(|| {
            EvaluationError::new(format!("NameError: name '{}' is not defined", name))
        })?;
        out.push_str(value);
        rest = &after[end..];
    }
    out.push_str(rest);
    Ok(out)
}

pub struct ScriptSynthesizer {
    engines: ScriptEngines,
}

impl Synthesizer for ScriptSynthesizer {
    fn name(&self) -> &str {
        "script"
    }

    fn run(&self, argv: &[String], _stdin: &[u8]) -> anyhow::Result<SynthesisOutput> {
        self.engines
            .record(|journal| journal.synthesis_calls.push(argv.to_vec()));
        if argv.iter().any(|arg| arg == "--fail") {
            return Err(anyhow!("synthesis aborted"));
        }
        Ok(SynthesisOutput {
            exit_code: 0,
            stdout: format!("synthesized: {}\n", argv.join(" ")),
            stderr: String::new(),
        })
    }
}
