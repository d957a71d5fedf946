//! hdlplay sandbox - isolated execution of playground programs
//!
//! A [`Runner`] owns one sandbox at a time: a dedicated thread that preloads an
//! interpreter engine and a synthesis engine, then evaluates each submitted
//! program in a fresh namespace. Output, artifacts and the final outcome come
//! back over the message protocol from `hdlplay-common`.

mod bridge;
mod dispatcher;
mod engine;
mod error;
mod runner;
mod sandbox;
mod types;
pub mod vcd;
pub mod waveform;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bridge::HookBridge;
#[cfg(feature = "process")]
pub use engine::process::{EngineSettings, ProcessEngines, ProcessInterpreter, ProcessSynthesizer};
pub use engine::{EngineLoader, Interpreter, NamespaceId, SynthesisOutput, Synthesizer};
pub use error::{EvaluationError, RunError};
pub use runner::Runner;
pub use sandbox::SandboxHandle;
pub use types::{RunEvent, RunId, RunObserver, RunOutput, RunRequest, SandboxId};
pub use vcd::VcdError;
pub use waveform::{ChangeValue, WaveEvent, WaveformError};

/// Re-export common error types
pub type Result<T> = anyhow::Result<T>;
