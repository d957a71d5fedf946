//! Sandbox thread and the host-side handle to it

use crate::dispatcher::Dispatcher;
use crate::engine::EngineLoader;
use crate::error::RunError;
use crate::types::SandboxId;
use hdlplay_common::{FrameError, HostMessage, SandboxMessage};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;

/// What the sandbox sends towards the host
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// Serialized [`SandboxMessage`]
    Frame(String),
    /// Failure outside the protocol
    Failure(String),
}

/// Host-side end of a running sandbox
///
/// Dropping the handle terminates the sandbox.
pub struct SandboxHandle {
    id: SandboxId,
    inbound: UnboundedSender<String>,
    outbound: UnboundedReceiver<WorkerEvent>,
    shutdown: CancellationToken,
}

impl SandboxHandle {
    /// Starts a sandbox on its own thread. Engine preloading begins
    /// immediately.
    pub fn spawn(loader: Arc<dyn EngineLoader>) -> Result<Self, RunError> {
        let id = SandboxId::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        std::thread::Builder::new()
            .name(format!("hdlplay-sandbox-{}", id.short()))
            .spawn(move || sandbox_main(id, loader, inbound_rx, outbound_tx, token))
            .map_err(|e| RunError::Transport(format!("failed to start sandbox thread: {}", e)))?;

        tracing::debug!(sandbox_id = %id, "Sandbox spawned");
        Ok(Self {
            id,
            inbound: inbound_tx,
            outbound: outbound_rx,
            shutdown,
        })
    }

    pub fn id(&self) -> SandboxId {
        self.id
    }

    pub fn post(&self, message: &HostMessage) -> Result<(), RunError> {
        let frame = message.to_frame().map_err(encode_failure)?;
        tracing::debug!(sandbox_id = %self.id, kind = message.kind(), "Sending");
        self.inbound
            .send(frame)
            .map_err(|_| RunError::Transport("sandbox is no longer running".to_string()))
    }

    /// Waits for the next message from the sandbox.
    pub async fn recv(&mut self) -> Result<SandboxMessage, RunError> {
        let event = self.outbound.recv().await;
        self.interpret(event)
    }

    /// Returns a message that is already waiting, without blocking.
    pub fn try_recv(&mut self) -> Option<Result<SandboxMessage, RunError>> {
        match self.outbound.try_recv() {
            Ok(event) => Some(self.interpret(Some(event))),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.interpret(None)),
        }
    }

    /// Handle wired to test channels instead of a sandbox thread.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, UnboundedReceiver<String>, UnboundedSender<WorkerEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: SandboxId::new(),
            inbound: inbound_tx,
            outbound: outbound_rx,
            shutdown: CancellationToken::new(),
        };
        (handle, inbound_rx, outbound_tx)
    }

    pub fn terminate(self) {
        tracing::info!(sandbox_id = %self.id, "Terminating sandbox");
    }

    fn interpret(&self, event: Option<WorkerEvent>) -> Result<SandboxMessage, RunError> {
        match event {
            Some(WorkerEvent::Frame(frame)) => {
                let message = SandboxMessage::from_frame(&frame)
                    .map_err(|e| RunError::Protocol(e.to_string()))?;
                tracing::debug!(sandbox_id = %self.id, kind = message.kind(), "Received");
                Ok(message)
            }
            Some(WorkerEvent::Failure(message)) => Err(RunError::Transport(message)),
            None => Err(RunError::Transport("sandbox exited unexpectedly".to_string())),
        }
    }
}

/// Outbound message could not be serialized.
fn encode_failure(error: FrameError) -> RunError {
    RunError::Transport(error.to_string())
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle").field("id", &self.id).finish()
    }
}

fn sandbox_main(
    id: SandboxId,
    loader: Arc<dyn EngineLoader>,
    inbound: UnboundedReceiver<String>,
    outbound: UnboundedSender<WorkerEvent>,
    shutdown: CancellationToken,
) {
    let failures = outbound.clone();
    let result = panic::catch_unwind(AssertUnwindSafe(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let local = LocalSet::new();
        local.block_on(&runtime, Dispatcher::run(id, loader, inbound, outbound, shutdown));
        Ok::<_, std::io::Error>(())
    }));

    let failure = match result {
        Ok(Ok(())) => {
            tracing::debug!(sandbox_id = %id, "Sandbox stopped");
            return;
        }
        Ok(Err(e)) => format!("failed to start sandbox runtime: {}", e),
        Err(payload) => format!("sandbox panicked: {}", panic_message(payload.as_ref())),
    };
    tracing::error!(sandbox_id = %id, %failure, "Sandbox died");
    // The host may already be gone
    let _ = failures.send(WorkerEvent::Failure(failure));
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
