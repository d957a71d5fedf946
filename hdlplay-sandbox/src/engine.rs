//! Engine adapter traits driven by the dispatcher

#[cfg(feature = "process")]
pub mod process;

use crate::bridge::HookBridge;
use crate::error::EvaluationError;
use async_trait::async_trait;
use hdlplay_common::Locator;
use std::rc::Rc;
use tokio_util::sync::CancellationToken;

/// Handle to an isolated namespace owned by an interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId(pub u64);

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ns-{}", self.0)
    }
}

/// Result of one synthesis invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Interpreter engine
///
/// Lives on the sandbox thread only, so implementations may hold `Rc` and
/// other non-`Send` state.
#[async_trait(?Send)]
pub trait Interpreter {
    fn name(&self) -> &str;

    /// Adds packages to the loaded set. Already loaded locators are skipped.
    async fn load_packages(&mut self, locators: &[Locator]) -> anyhow::Result<()>;

    /// Creates an empty namespace. Nothing defined by a previous evaluation
    /// may be visible in it.
    fn create_namespace(&mut self) -> anyhow::Result<NamespaceId>;

    /// Evaluates source text in a namespace.
    async fn evaluate(&mut self, namespace: NamespaceId, source: &str)
        -> Result<(), EvaluationError>;

    /// Releases everything the namespace holds. Called exactly once per
    /// created namespace, whatever the outcome of its evaluation.
    fn release_namespace(&mut self, namespace: NamespaceId);
}

/// Synthesis engine, invoked only through the hook bridge while an
/// evaluation is running
pub trait Synthesizer {
    fn name(&self) -> &str;

    fn run(&self, argv: &[String], stdin: &[u8]) -> anyhow::Result<SynthesisOutput>;
}

/// Creates the engines of a sandbox
///
/// The loader itself is shared with the host; the engines it produces stay
/// on the sandbox thread.
#[async_trait(?Send)]
pub trait EngineLoader: Send + Sync + 'static {
    /// Loads the interpreter with the hook bridge registered. `shutdown` is
    /// cancelled when the sandbox is terminated.
    async fn load_interpreter(
        &self,
        hooks: Rc<HookBridge>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Box<dyn Interpreter>>;

    async fn load_synthesizer(&self) -> anyhow::Result<Rc<dyn Synthesizer>>;
}
