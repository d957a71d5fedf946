//! Error types surfaced by the runner and engines

use thiserror::Error;

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// The submitted source raised an error. Displays exactly the message
    /// reported by the sandbox. The sandbox stays usable.
    #[error("{0}")]
    Evaluation(String),

    /// The sandbox died or failed outside the protocol. The next run
    /// recreates it.
    #[error("Sandbox failure: {0}")]
    Transport(String),

    /// A message arrived that the protocol does not allow at this point.
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl RunError {
    pub fn is_evaluation(&self) -> bool {
        matches!(self, RunError::Evaluation(_))
    }

    /// Whether the sandbox had to be discarded because of this error.
    pub fn invalidates_sandbox(&self) -> bool {
        !self.is_evaluation()
    }
}

/// Error raised while an interpreter evaluated source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvaluationError {
    message: String,
}

impl EvaluationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }
}

impl From<anyhow::Error> for EvaluationError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}
