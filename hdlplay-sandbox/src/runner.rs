//! Host-side entry point for running programs

use crate::engine::EngineLoader;
use crate::error::RunError;
use crate::sandbox::SandboxHandle;
use crate::types::{RunObserver, RunRequest, SandboxId};
use hdlplay_common::{Configuration, HostMessage, SandboxMessage, Stream};
use std::sync::Arc;

enum SandboxState {
    Absent,
    /// `LoadConfiguration` was sent and no run has finished since
    Loading {
        sandbox: SandboxHandle,
        configuration: Configuration,
    },
    Ready {
        sandbox: SandboxHandle,
        configuration: Configuration,
    },
}

/// Owns the sandbox and runs programs in it
///
/// The sandbox is created lazily, kept across runs that use the same
/// configuration, and replaced whenever the configuration changes or the
/// sandbox fails.
///
/// [`run`](Self::run) takes `&mut self`, so a runner never has two runs in
/// flight. Dropping a `run` future before it completes abandons the run; the
/// sandbox may still be working on it, so the next call terminates it and
/// starts a fresh one. Sharing one sandbox between several runners is not
/// supported.
pub struct Runner {
    loader: Arc<dyn EngineLoader>,
    state: SandboxState,
    in_flight: bool,
}

impl Runner {
    pub fn new(loader: impl EngineLoader) -> Self {
        Self::with_loader(Arc::new(loader))
    }

    pub fn with_loader(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            state: SandboxState::Absent,
            in_flight: false,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            SandboxState::Absent => "absent",
            SandboxState::Loading { .. } => "loading",
            SandboxState::Ready { .. } => "ready",
        }
    }

    /// Identity of the live sandbox, if any.
    pub fn sandbox_id(&self) -> Option<SandboxId> {
        match &self.state {
            SandboxState::Absent => None,
            SandboxState::Loading { sandbox, .. } | SandboxState::Ready { sandbox, .. } => {
                Some(sandbox.id())
            }
        }
    }

    /// Configuration the live sandbox was told to load.
    pub fn configuration(&self) -> Option<&Configuration> {
        match &self.state {
            SandboxState::Absent => None,
            SandboxState::Loading { configuration, .. }
            | SandboxState::Ready { configuration, .. } => Some(configuration),
        }
    }

    /// Makes sure a sandbox for `configuration` exists without running
    /// anything. Package loading starts in the background.
    pub fn prepare(&mut self, configuration: &Configuration) -> Result<SandboxId, RunError> {
        if self.in_flight {
            tracing::warn!("Previous run was abandoned, restarting sandbox");
            self.in_flight = false;
            self.invalidate();
        }
        self.check_idle()?;

        if let SandboxState::Loading {
            sandbox,
            configuration: current,
        }
        | SandboxState::Ready {
            sandbox,
            configuration: current,
        } = &self.state
        {
            if current == configuration {
                return Ok(sandbox.id());
            }
            tracing::info!(
                sandbox_id = %sandbox.id(),
                from = %current,
                to = %configuration,
                "Configuration changed, replacing sandbox"
            );
        }
        self.invalidate();

        let sandbox = SandboxHandle::spawn(Arc::clone(&self.loader))?;
        let sandbox_id = sandbox.id();
        tracing::info!(%sandbox_id, locators = %configuration, "Sandbox created");
        sandbox.post(&HostMessage::LoadConfiguration {
            locators: configuration.locators().to_vec(),
        })?;
        self.state = SandboxState::Loading {
            sandbox,
            configuration: configuration.clone(),
        };
        Ok(sandbox_id)
    }

    /// Runs a program, forwarding its output to `observer` as it arrives.
    ///
    /// Evaluation errors leave the sandbox in place; any other error discards
    /// it so the next call starts a fresh one. Nothing is retried.
    pub async fn run(
        &mut self,
        request: &RunRequest,
        observer: &mut dyn RunObserver,
    ) -> Result<(), RunError> {
        let sandbox_id = self.prepare(&request.configuration)?;

        let sandbox = match &mut self.state {
            SandboxState::Loading { sandbox, .. } | SandboxState::Ready { sandbox, .. } => sandbox,
            SandboxState::Absent => {
                return Err(RunError::Transport("sandbox is not running".to_string()))
            }
        };
        if let Err(e) = sandbox.post(&HostMessage::Execute {
            source: request.source.clone(),
        }) {
            self.invalidate();
            return Err(e);
        }

        self.in_flight = true;
        let outcome = Self::drive(sandbox, observer).await;
        self.in_flight = false;

        match outcome {
            Ok(()) => {
                self.mark_ready();
                Ok(())
            }
            Err(RunError::Evaluation(message)) => {
                tracing::debug!(%sandbox_id, "Run raised an error");
                self.mark_ready();
                Err(RunError::Evaluation(message))
            }
            Err(e) => {
                tracing::error!(%sandbox_id, error = %e, "Run failed, discarding sandbox");
                self.invalidate();
                Err(e)
            }
        }
    }

    /// Terminates the sandbox, if any.
    pub fn terminate(&mut self) {
        self.in_flight = false;
        self.invalidate();
    }

    async fn drive(
        sandbox: &mut SandboxHandle,
        observer: &mut dyn RunObserver,
    ) -> Result<(), RunError> {
        loop {
            match sandbox.recv().await? {
                SandboxMessage::OutputChunk {
                    stream: Stream::Stdout,
                    text,
                } => observer.on_stdout(&text),
                SandboxMessage::OutputChunk {
                    stream: Stream::Stderr,
                    text,
                } => observer.on_stderr(&text),
                SandboxMessage::Artifact(artifact) => observer.on_artifact(artifact),
                SandboxMessage::RunFinished { error: None } => return Ok(()),
                SandboxMessage::RunFinished { error: Some(message) } => {
                    return Err(RunError::Evaluation(message))
                }
            }
        }
    }

    /// Looks at anything the idle sandbox sent since the last run.
    fn check_idle(&mut self) -> Result<(), RunError> {
        let pending = match &mut self.state {
            SandboxState::Absent => return Ok(()),
            SandboxState::Loading { sandbox, .. } | SandboxState::Ready { sandbox, .. } => {
                sandbox.try_recv()
            }
        };

        match pending {
            None => Ok(()),
            Some(Ok(message)) => {
                let err = RunError::Protocol(format!(
                    "received {} with no run in flight",
                    message.kind()
                ));
                tracing::error!(error = %err, "Protocol violation");
                self.invalidate();
                Err(err)
            }
            Some(Err(err @ RunError::Protocol(_))) => {
                tracing::error!(error = %err, "Protocol violation");
                self.invalidate();
                Err(err)
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "Sandbox failed while idle, recreating");
                self.invalidate();
                Ok(())
            }
        }
    }

    fn mark_ready(&mut self) {
        self.state = match std::mem::replace(&mut self.state, SandboxState::Absent) {
            SandboxState::Loading {
                sandbox,
                configuration,
            } => {
                tracing::debug!(sandbox_id = %sandbox.id(), "Sandbox ready");
                SandboxState::Ready {
                    sandbox,
                    configuration,
                }
            }
            other => other,
        };
    }

    fn invalidate(&mut self) {
        match std::mem::replace(&mut self.state, SandboxState::Absent) {
            SandboxState::Loading { sandbox, .. } | SandboxState::Ready { sandbox, .. } => {
                sandbox.terminate()
            }
            SandboxState::Absent => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::WorkerEvent;
    use crate::testing::ScriptEngines;
    use crate::types::{RunEvent, RunOutput};
    use assert_matches::assert_matches;
    use hdlplay_common::Locator;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn config(locators: &[&str]) -> Configuration {
        Configuration::new(locators.iter().map(|l| Locator::new(*l)))
    }

    fn frame(message: &SandboxMessage) -> WorkerEvent {
        WorkerEvent::Frame(message.to_frame().unwrap())
    }

    /// Runner whose sandbox is driven by the test through the returned channels.
    fn attached_runner(
        configuration: &Configuration,
    ) -> (
        Runner,
        tokio::sync::mpsc::UnboundedReceiver<String>,
        tokio::sync::mpsc::UnboundedSender<WorkerEvent>,
    ) {
        let (sandbox, inbound, outbound) = SandboxHandle::detached();
        let mut runner = Runner::new(ScriptEngines::new());
        runner.state = SandboxState::Ready {
            sandbox,
            configuration: configuration.clone(),
        };
        (runner, inbound, outbound)
    }

    #[tokio::test]
    async fn test_lazy_creation_and_states() {
        let mut runner = Runner::new(ScriptEngines::new());
        assert_eq!(runner.state_name(), "absent");
        assert!(runner.sandbox_id().is_none());

        let configuration = config(&["a-1.whl"]);
        let id = runner.prepare(&configuration).unwrap();
        assert_eq!(runner.state_name(), "loading");
        assert_eq!(runner.sandbox_id(), Some(id));
        assert_eq!(runner.configuration(), Some(&configuration));

        let mut output = RunOutput::new();
        runner
            .run(&RunRequest::new("print hi", configuration), &mut output)
            .await
            .unwrap();
        assert_eq!(runner.state_name(), "ready");
        assert_eq!(runner.sandbox_id(), Some(id));
        assert_eq!(output.stdout(), "hi\n");

        runner.terminate();
        assert_eq!(runner.state_name(), "absent");
    }

    #[tokio::test]
    async fn test_evaluation_error_keeps_sandbox() {
        let mut runner = Runner::new(ScriptEngines::new());
        let configuration = config(&[]);

        let result = runner
            .run(
                &RunRequest::new("raise ValueError: bad", configuration.clone()),
                &mut RunOutput::new(),
            )
            .await;
        assert_matches!(result, Err(RunError::Evaluation(message)) if message == "ValueError: bad");
        let id = runner.sandbox_id();
        assert_eq!(runner.state_name(), "ready");

        runner
            .run(&RunRequest::new("print ok", configuration), &mut RunOutput::new())
            .await
            .unwrap();
        assert_eq!(runner.sandbox_id(), id);
    }

    #[tokio::test]
    async fn test_crash_discards_sandbox() {
        let engines = ScriptEngines::new();
        let mut runner = Runner::new(engines.clone());
        let configuration = config(&[]);

        let result = runner
            .run(&RunRequest::new("crash", configuration.clone()), &mut RunOutput::new())
            .await;
        assert_matches!(result, Err(RunError::Transport(message)) if message.contains("scripted crash"));
        assert_eq!(runner.state_name(), "absent");

        runner
            .run(&RunRequest::new("print again", configuration), &mut RunOutput::new())
            .await
            .unwrap();
        assert_eq!(engines.journal().interpreters_created, 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_configuration_change_replaces_sandbox() {
        let engines = ScriptEngines::new();
        let mut runner = Runner::new(engines.clone());

        let first = runner.prepare(&config(&["a-1.whl"])).unwrap();
        assert_eq!(runner.prepare(&config(&["a-1.whl"])).unwrap(), first);
        let second = runner.prepare(&config(&["a-2.whl"])).unwrap();
        assert_ne!(first, second);
        assert!(logs_contain("Configuration changed, replacing sandbox"));
    }

    #[tokio::test]
    async fn test_abandoned_run_restarts_sandbox() {
        let mut runner = Runner::new(ScriptEngines::new());
        let configuration = config(&[]);

        let slow = RunRequest::new("sleep 5000\nprint never", configuration.clone());
        let mut output = RunOutput::new();
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), runner.run(&slow, &mut output)).await;
        assert!(abandoned.is_err());
        let first = runner.sandbox_id();

        let mut output = RunOutput::new();
        runner
            .run(&RunRequest::new("print fresh", configuration), &mut output)
            .await
            .unwrap();
        assert_ne!(runner.sandbox_id(), first);
        assert_eq!(output.stdout(), "fresh\n");
    }

    #[tokio::test]
    async fn test_message_while_idle_is_protocol_violation() {
        let configuration = config(&[]);
        let (mut runner, mut inbound, outbound) = attached_runner(&configuration);
        outbound
            .send(frame(&SandboxMessage::RunFinished { error: None }))
            .unwrap();

        let result = runner
            .run(&RunRequest::new("print hi", configuration), &mut RunOutput::new())
            .await;
        assert_matches!(result, Err(RunError::Protocol(message)) if message.contains("runFinished"));
        assert_eq!(runner.state_name(), "absent");
        // Nothing was submitted to the offending sandbox
        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_frame_during_run_is_protocol_violation() {
        let configuration = config(&[]);
        let (mut runner, mut inbound, outbound) = attached_runner(&configuration);

        let sandbox = tokio::spawn(async move {
            let execute = inbound.recv().await.unwrap();
            assert_matches!(
                HostMessage::from_frame(&execute).unwrap(),
                HostMessage::Execute { source } if source == "print hi"
            );
            outbound
                .send(frame(&SandboxMessage::OutputChunk {
                    stream: Stream::Stdout,
                    text: "hi\n".into(),
                }))
                .unwrap();
            outbound
                .send(WorkerEvent::Frame(r#"{"type":"showRtlil"}"#.to_string()))
                .unwrap();
            outbound
        });

        let mut output = RunOutput::new();
        let result = runner
            .run(&RunRequest::new("print hi", configuration), &mut output)
            .await;
        assert_matches!(result, Err(RunError::Protocol(_)));
        assert_eq!(runner.state_name(), "absent");
        assert_eq!(output.events, vec![RunEvent::Stdout("hi\n".into())]);
        sandbox.await.unwrap();
    }
}
