//! Message loop running inside the sandbox

use crate::bridge::HookBridge;
use crate::engine::{EngineLoader, Interpreter, NamespaceId, Synthesizer};
use crate::error::EvaluationError;
use crate::sandbox::{panic_message, WorkerEvent};
use crate::types::{RunId, SandboxId};
use hdlplay_common::{HostMessage, Locator};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Engine that is loading in the background
enum Preload<T> {
    Pending(JoinHandle<anyhow::Result<T>>),
    Ready(T),
    Failed(String),
}

impl<T: 'static> Preload<T> {
    fn start<F>(engine: &'static str, load: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + 'static,
    {
        Preload::Pending(tokio::task::spawn_local(async move {
            let started = Instant::now();
            let result = load.await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => tracing::info!(engine, elapsed_ms, "Engine loaded"),
                Err(e) => tracing::error!(engine, elapsed_ms, error = %format!("{:#}", e), "Engine failed to load"),
            }
            result
        }))
    }

    /// Waits for the load to settle. A failed load stays failed.
    async fn ready(&mut self) -> Result<&mut T, String> {
        if let Preload::Pending(handle) = self {
            let settled = match handle.await {
                Ok(Ok(engine)) => Preload::Ready(engine),
                Ok(Err(e)) => Preload::Failed(format!("{:#}", e)),
                Err(e) => Preload::Failed(join_failure(e)),
            };
            *self = settled;
        }
        match self {
            Preload::Ready(engine) => Ok(engine),
            Preload::Failed(message) => Err(message.clone()),
            Preload::Pending(_) => Err("engine load did not settle".to_string()),
        }
    }
}

fn join_failure(err: JoinError) -> String {
    if err.is_panic() {
        format!("panicked: {}", panic_message(err.into_panic().as_ref()))
    } else {
        err.to_string()
    }
}

/// Unit of work taken from the inbound queue
enum Task {
    Load(Vec<Locator>),
    Execute(String),
}

impl From<HostMessage> for Task {
    fn from(message: HostMessage) -> Self {
        match message {
            HostMessage::LoadConfiguration { locators } => Task::Load(locators),
            HostMessage::Execute { source } => Task::Execute(source),
        }
    }
}

/// Namespace that is released when dropped, after the bridge stopped
/// accepting hooks for the run
struct IsolatedNamespace<'a> {
    interpreter: &'a mut Box<dyn Interpreter>,
    bridge: &'a HookBridge,
    id: NamespaceId,
}

impl IsolatedNamespace<'_> {
    async fn evaluate(&mut self, source: &str) -> Result<(), EvaluationError> {
        self.interpreter.evaluate(self.id, source).await
    }
}

impl Drop for IsolatedNamespace<'_> {
    fn drop(&mut self) {
        self.bridge.end();
        self.interpreter.release_namespace(self.id);
        tracing::trace!(namespace = %self.id, "Namespace released");
    }
}

pub(crate) struct Dispatcher {
    id: SandboxId,
    bridge: Rc<HookBridge>,
    interpreter: Preload<Box<dyn Interpreter>>,
    synthesizer: Preload<Rc<dyn Synthesizer>>,
    inbound: UnboundedReceiver<String>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Runs the sandbox until it is cancelled or the host hangs up. Must be
    /// called inside a `LocalSet`.
    pub(crate) async fn run(
        id: SandboxId,
        loader: Arc<dyn EngineLoader>,
        inbound: UnboundedReceiver<String>,
        outbound: UnboundedSender<WorkerEvent>,
        shutdown: CancellationToken,
    ) {
        let bridge = Rc::new(HookBridge::new(outbound));

        // Both engines load concurrently; neither waits for the other
        let interpreter = {
            let loader = Arc::clone(&loader);
            let hooks = Rc::clone(&bridge);
            let token = shutdown.clone();
            Preload::start("interpreter", async move {
                loader.load_interpreter(hooks, token).await
            })
        };
        let synthesizer = Preload::start("synthesizer", async move {
            loader.load_synthesizer().await
        });

        let mut dispatcher = Dispatcher {
            id,
            bridge,
            interpreter,
            synthesizer,
            inbound,
            shutdown,
        };
        dispatcher.serve().await;
    }

    async fn serve(&mut self) {
        let shutdown = self.shutdown.clone();
        tracing::debug!(sandbox_id = %self.id, "Dispatcher started");

        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = self.inbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let task = match HostMessage::from_frame(&frame) {
                Ok(message) => {
                    tracing::debug!(sandbox_id = %self.id, kind = message.kind(), "Received");
                    Task::from(message)
                }
                Err(e) => {
                    self.bridge.report_failure(e.to_string());
                    continue;
                }
            };

            // Tasks never overlap: the next frame is only taken once this
            // one has settled
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = self.perform(task) => Some(result),
            };
            match outcome {
                None => break,
                Some(Ok(())) => {}
                Some(Err(message)) => self.bridge.report_failure(message),
            }
        }

        tracing::debug!(sandbox_id = %self.id, "Dispatcher stopped");
    }

    async fn perform(&mut self, task: Task) -> Result<(), String> {
        match task {
            Task::Load(locators) => self.load(&locators).await,
            Task::Execute(source) => self.execute(&source).await,
        }
    }

    async fn load(&mut self, locators: &[Locator]) -> Result<(), String> {
        let interpreter = self
            .interpreter
            .ready()
            .await
            .map_err(|e| format!("interpreter failed to load: {}", e))?;

        let started = Instant::now();
        tracing::info!(sandbox_id = %self.id, locators = locators.len(), "Loading packages");
        interpreter
            .load_packages(locators)
            .await
            .map_err(|e| format!("failed to load packages: {:#}", e))?;
        tracing::info!(
            sandbox_id = %self.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Packages loaded"
        );
        Ok(())
    }

    async fn execute(&mut self, source: &str) -> Result<(), String> {
        let synthesizer = self
            .synthesizer
            .ready()
            .await
            .map_err(|e| format!("synthesis engine failed to load: {}", e))?;
        self.bridge.attach_synthesizer(Rc::clone(synthesizer));

        let interpreter = self
            .interpreter
            .ready()
            .await
            .map_err(|e| format!("interpreter failed to load: {}", e))?;

        let run_id = RunId::new();
        tracing::info!(sandbox_id = %self.id, %run_id, "Executing");
        self.bridge.begin(run_id);

        let outcome = match interpreter.create_namespace() {
            Ok(id) => {
                let mut namespace = IsolatedNamespace {
                    interpreter,
                    bridge: &self.bridge,
                    id,
                };
                namespace.evaluate(source).await
            }
            Err(e) => {
                self.bridge.end();
                Err(EvaluationError::new(format!("failed to create namespace: {:#}", e)))
            }
        };

        let error = outcome.err().map(EvaluationError::into_message);
        match &error {
            None => tracing::info!(sandbox_id = %self.id, %run_id, "Run finished"),
            Some(message) => {
                tracing::info!(sandbox_id = %self.id, %run_id, error = %message, "Run failed")
            }
        }
        self.bridge.send_finished(error);
        Ok(())
    }
}
