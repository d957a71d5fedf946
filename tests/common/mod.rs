//! Common test utilities shared across integration tests

use hdlplay_common::{Configuration, Locator};
use hdlplay_sandbox::testing::ScriptEngines;
use hdlplay_sandbox::{RunError, RunOutput, RunRequest, Runner};

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Locator of a wheel for `package` at `version`.
pub fn wheel(package: &str, version: &str) -> Locator {
    Locator::new(format!(
        "https://files.example.org/wheels/{}-{}-py3-none-any.whl",
        package, version
    ))
}

pub fn configuration(packages: &[(&str, &str)]) -> Configuration {
    Configuration::new(packages.iter().map(|(name, version)| wheel(name, version)))
}

/// Runner over scripted engines, plus a handle on their journal.
pub struct Harness {
    pub engines: ScriptEngines,
    pub runner: Runner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engines(ScriptEngines::new())
    }

    pub fn with_engines(engines: ScriptEngines) -> Self {
        setup_test_logging();
        Self {
            runner: Runner::new(engines.clone()),
            engines,
        }
    }

    /// Runs `source` and returns what it produced along with the outcome.
    pub async fn run(
        &mut self,
        source: &str,
        configuration: &Configuration,
    ) -> (RunOutput, Result<(), RunError>) {
        let mut output = RunOutput::new();
        let request = RunRequest::new(source, configuration.clone());
        let result = self.runner.run(&request, &mut output).await;
        (output, result)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
