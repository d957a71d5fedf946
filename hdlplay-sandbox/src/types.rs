//! Core types for running programs

use hdlplay_common::{Artifact, ArtifactKind, Configuration};
use serde::{Deserialize, Serialize};

/// Unique sandbox identifier, used only for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxId(pub uuid::Uuid);

impl SandboxId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// First eight hex digits, short enough for thread names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one `Execute` inside a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to run a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Source text, handed to the interpreter unmodified
    pub source: String,

    /// Packages that must be loaded in the sandbox
    pub configuration: Configuration,
}

impl RunRequest {
    pub fn new(source: impl Into<String>, configuration: Configuration) -> Self {
        Self {
            source: source.into(),
            configuration,
        }
    }
}

/// Receives the streamed part of a run, synchronously and in arrival order.
pub trait RunObserver {
    fn on_stdout(&mut self, _text: &str) {}

    fn on_stderr(&mut self, _text: &str) {}

    fn on_artifact(&mut self, _artifact: Artifact) {}
}

/// One streamed item of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Stdout(String),
    Stderr(String),
    Artifact(Artifact),
}

/// Observer that records everything it is given
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub events: Vec<RunEvent>,
}

impl RunOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenated stdout text.
    pub fn stdout(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                RunEvent::Stdout(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated stderr text.
    pub fn stderr(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                RunEvent::Stderr(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.events.iter().filter_map(|event| match event {
            RunEvent::Artifact(artifact) => Some(artifact),
            _ => None,
        })
    }

    /// Most recent artifact of a kind; later ones replace earlier ones.
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts().filter(|a| a.kind() == kind).last()
    }
}

impl RunObserver for RunOutput {
    fn on_stdout(&mut self, text: &str) {
        self.events.push(RunEvent::Stdout(text.to_string()));
    }

    fn on_stderr(&mut self, text: &str) {
        self.events.push(RunEvent::Stderr(text.to_string()));
    }

    fn on_artifact(&mut self, artifact: Artifact) {
        self.events.push(RunEvent::Artifact(artifact));
    }
}
