//! Hook table reachable from evaluated source
//!
//! The bridge is created once per sandbox and registered with the
//! interpreter at load time. Every hook serializes a protocol message and
//! sends it towards the host. Hooks only have effect while a run is open;
//! anything arriving outside that window (deferred callbacks firing after the
//! evaluation returned) is dropped.

use crate::engine::{SynthesisOutput, Synthesizer};
use crate::sandbox::WorkerEvent;
use crate::types::RunId;
use crate::waveform::{self, WaveEvent, WaveformError};
use crate::vcd;
use anyhow::anyhow;
use hdlplay_common::{Artifact, SandboxMessage, Stream};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::mpsc::UnboundedSender;

pub struct HookBridge {
    outbound: UnboundedSender<WorkerEvent>,
    current: Cell<Option<RunId>>,
    stdout: RefCell<String>,
    stderr: RefCell<String>,
    synthesizer: RefCell<Option<Rc<dyn Synthesizer>>>,
}

impl HookBridge {
    pub(crate) fn new(outbound: UnboundedSender<WorkerEvent>) -> Self {
        Self {
            outbound,
            current: Cell::new(None),
            stdout: RefCell::new(String::new()),
            stderr: RefCell::new(String::new()),
            synthesizer: RefCell::new(None),
        }
    }

    /// Run the hooks currently report to, if any.
    pub fn current_run(&self) -> Option<RunId> {
        self.current.get()
    }

    /// Line-buffered output. Each complete line is sent as soon as it is
    /// available; a trailing partial line waits for its newline, for output on
    /// the other stream or an artifact, or for the end of the run.
    pub fn write(&self, stream: Stream, text: &str) {
        let Some(run_id) = self.current.get() else {
            tracing::warn!(%stream, "Output outside of a run dropped");
            return;
        };
        if text.is_empty() {
            return;
        }

        self.flush(other(stream));
        let mut buffer = self.buffer(stream).borrow_mut();
        buffer.push_str(text);
        while let Some(end) = buffer.find('\n') {
            let line: String = buffer.drain(..=end).collect();
            tracing::trace!(%run_id, %stream, "Output line");
            self.send(SandboxMessage::OutputChunk { stream, text: line });
        }
    }

    pub fn write_line(&self, stream: Stream, line: &str) {
        self.write(stream, &format!("{}\n", line));
    }

    pub fn show_rtlil(&self, code: impl Into<String>) {
        self.emit(Artifact::Rtlil(code.into()));
    }

    pub fn show_verilog(&self, code: impl Into<String>) {
        self.emit(Artifact::Verilog(code.into()));
    }

    /// Converts an event log into a waveform tree and emits it.
    pub fn show_waveforms(&self, events: &[WaveEvent]) -> Result<(), WaveformError> {
        if self.current.get().is_none() {
            tracing::warn!("Waveforms outside of a run dropped");
            return Ok(());
        }
        let tree = waveform::convert(events)?;
        self.emit(Artifact::Waveform(tree));
        Ok(())
    }

    /// Same as [`show_waveforms`](Self::show_waveforms) for a VCD document.
    pub fn show_vcd(&self, text: &str) -> Result<(), WaveformError> {
        let events = vcd::tokenize(text)?;
        self.show_waveforms(&events)
    }

    /// Emits an artifact for the current run.
    pub fn emit(&self, artifact: Artifact) {
        let Some(run_id) = self.current.get() else {
            tracing::warn!(kind = %artifact.kind(), "Artifact outside of a run dropped");
            return;
        };
        self.flush(Stream::Stdout);
        self.flush(Stream::Stderr);
        tracing::debug!(%run_id, kind = %artifact.kind(), "Artifact");
        self.send(SandboxMessage::Artifact(artifact));
    }

    /// Invokes the synthesis engine. Only valid while a run is open.
    pub fn run_synthesis(&self, argv: &[String], stdin: &[u8]) -> anyhow::Result<SynthesisOutput> {
        let Some(run_id) = self.current.get() else {
            return Err(anyhow!("synthesis requested outside of a run"));
        };
        let synthesizer = self
            .synthesizer
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("synthesis engine is not loaded"))?;

        tracing::debug!(%run_id, engine = synthesizer.name(), ?argv, "Running synthesis");
        let output = synthesizer.run(argv, stdin)?;
        tracing::debug!(%run_id, exit_code = output.exit_code, "Synthesis finished");
        Ok(output)
    }

    pub(crate) fn attach_synthesizer(&self, synthesizer: Rc<dyn Synthesizer>) {
        *self.synthesizer.borrow_mut() = Some(synthesizer);
    }

    pub(crate) fn begin(&self, run_id: RunId) {
        self.stdout.borrow_mut().clear();
        self.stderr.borrow_mut().clear();
        self.current.set(Some(run_id));
    }

    /// Flushes partial lines and closes the run.
    pub(crate) fn end(&self) {
        self.flush(Stream::Stdout);
        self.flush(Stream::Stderr);
        self.current.set(None);
    }

    pub(crate) fn send_finished(&self, error: Option<String>) {
        self.send(SandboxMessage::RunFinished { error });
    }

    /// Reports a failure outside the protocol.
    pub(crate) fn report_failure(&self, message: String) {
        tracing::error!(%message, "Sandbox failure");
        if self.outbound.send(WorkerEvent::Failure(message)).is_err() {
            tracing::debug!("Host is gone, failure not delivered");
        }
    }

    fn buffer(&self, stream: Stream) -> &RefCell<String> {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    fn flush(&self, stream: Stream) {
        let text = std::mem::take(&mut *self.buffer(stream).borrow_mut());
        if !text.is_empty() {
            self.send(SandboxMessage::OutputChunk { stream, text });
        }
    }

    fn send(&self, message: SandboxMessage) {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.report_failure(e.to_string());
                return;
            }
        };
        tracing::debug!(kind = message.kind(), "Sending");
        if self.outbound.send(WorkerEvent::Frame(frame)).is_err() {
            tracing::debug!(kind = message.kind(), "Host is gone, message not delivered");
        }
    }
}

fn other(stream: Stream) -> Stream {
    match stream {
        Stream::Stdout => Stream::Stderr,
        Stream::Stderr => Stream::Stdout,
    }
}
