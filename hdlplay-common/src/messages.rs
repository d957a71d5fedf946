//! Messages exchanged between the host runner and the sandbox
//!
//! Every message crosses the boundary as one JSON text frame. The `type`
//! (and, for artifacts, `kind`) tags and field names are the whole
//! compatibility contract with the sandbox.

use crate::{Locator, WaveNode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Host -> Sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    /// Bring the interpreter's package set up to this configuration.
    LoadConfiguration { locators: Vec<Locator> },
    /// Evaluate source text in a fresh namespace.
    Execute { source: String },
}

impl HostMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::LoadConfiguration { .. } => "loadConfiguration",
            HostMessage::Execute { .. } => "execute",
        }
    }
}

/// Output stream of the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => f.write_str("stdout"),
            Stream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Named result produced by a hook called from evaluated source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum Artifact {
    Rtlil(String),
    Verilog(String),
    Waveform(WaveNode),
}

/// Artifact discriminant without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Rtlil,
    Verilog,
    Waveform,
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Rtlil(_) => ArtifactKind::Rtlil,
            Artifact::Verilog(_) => ArtifactKind::Verilog,
            Artifact::Waveform(_) => ArtifactKind::Waveform,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Rtlil => f.write_str("rtlil"),
            ArtifactKind::Verilog => f.write_str("verilog"),
            ArtifactKind::Waveform => f.write_str("waveform"),
        }
    }
}

/// Sandbox -> Host
///
/// For each `Execute` the sandbox sends any number of `OutputChunk` and
/// `Artifact` messages followed by exactly one `RunFinished`, and nothing for
/// that run afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SandboxMessage {
    OutputChunk { stream: Stream, text: String },
    Artifact(Artifact),
    RunFinished { error: Option<String> },
}

impl SandboxMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxMessage::OutputChunk { .. } => "outputChunk",
            SandboxMessage::Artifact(_) => "artifact",
            SandboxMessage::RunFinished { .. } => "runFinished",
        }
    }
}

/// Frame could not be converted to or from a message.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to encode {kind} message: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected message {frame}: {source}")]
    Decode {
        frame: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Serializes a message into a text frame.
pub fn encode_frame<T: Serialize>(kind: &'static str, message: &T) -> Result<String, FrameError> {
    serde_json::to_string(message).map_err(|source| FrameError::Encode { kind, source })
}

/// Parses a text frame. Anything outside the closed message set is an error.
pub fn decode_frame<T: DeserializeOwned>(frame: &str) -> Result<T, FrameError> {
    serde_json::from_str(frame).map_err(|source| FrameError::Decode {
        frame: preview(frame),
        source,
    })
}

fn preview(frame: &str) -> String {
    const LIMIT: usize = 120;
    match frame.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &frame[..idx]),
        None => frame.to_string(),
    }
}

impl HostMessage {
    pub fn to_frame(&self) -> Result<String, FrameError> {
        encode_frame(self.kind(), self)
    }

    pub fn from_frame(frame: &str) -> Result<Self, FrameError> {
        decode_frame(frame)
    }
}

impl SandboxMessage {
    pub fn to_frame(&self) -> Result<String, FrameError> {
        encode_frame(self.kind(), self)
    }

    pub fn from_frame(frame: &str) -> Result<Self, FrameError> {
        decode_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeType, WaveNode};
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    fn to_value(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn test_host_message_tags() {
        let load = HostMessage::LoadConfiguration {
            locators: vec![Locator::new("a.whl")],
        };
        assert_eq!(
            to_value(&load.to_frame().unwrap()),
            json!({"type": "loadConfiguration", "locators": ["a.whl"]})
        );

        let execute = HostMessage::Execute {
            source: "print(1)".into(),
        };
        assert_eq!(
            to_value(&execute.to_frame().unwrap()),
            json!({"type": "execute", "source": "print(1)"})
        );
    }

    #[test]
    fn test_sandbox_message_tags() {
        let chunk = SandboxMessage::OutputChunk {
            stream: Stream::Stderr,
            text: "oops\n".into(),
        };
        assert_eq!(
            to_value(&chunk.to_frame().unwrap()),
            json!({"type": "outputChunk", "stream": "stderr", "text": "oops\n"})
        );

        let done = SandboxMessage::RunFinished { error: None };
        assert_eq!(
            to_value(&done.to_frame().unwrap()),
            json!({"type": "runFinished", "error": null})
        );
    }

    #[test]
    fn test_artifact_frames() {
        let verilog = SandboxMessage::Artifact(Artifact::Verilog("module top;".into()));
        let frame = verilog.to_frame().unwrap();
        assert_eq!(
            to_value(&frame),
            json!({"type": "artifact", "kind": "verilog", "payload": "module top;"})
        );
        assert_eq!(SandboxMessage::from_frame(&frame).unwrap(), verilog);

        let tree = WaveNode::signal("clk", NodeType::signal("wire", 1), vec![(0, "1".into())]);
        let waveform = SandboxMessage::Artifact(Artifact::Waveform(tree));
        let frame = waveform.to_frame().unwrap();
        assert_eq!(to_value(&frame)["payload"]["data"], json!([[0, "1"]]));
        assert_eq!(SandboxMessage::from_frame(&frame).unwrap(), waveform);
    }

    #[test]
    fn test_unknown_frames_rejected() {
        assert_matches!(
            SandboxMessage::from_frame(r#"{"type": "pythonDone", "error": null}"#),
            Err(FrameError::Decode { .. })
        );
        assert_matches!(
            HostMessage::from_frame("not json"),
            Err(FrameError::Decode { .. })
        );
        assert_matches!(
            SandboxMessage::from_frame(r#"{"type": "artifact", "kind": "netlist", "payload": ""}"#),
            Err(FrameError::Decode { .. })
        );
    }

    #[test]
    fn test_run_finished_error_text() {
        let frame = r#"{"type": "runFinished", "error": "NameError: x"}"#;
        assert_eq!(
            SandboxMessage::from_frame(frame).unwrap(),
            SandboxMessage::RunFinished {
                error: Some("NameError: x".into())
            }
        );
        assert_eq!(Artifact::Rtlil(String::new()).kind().to_string(), "rtlil");
    }
}
