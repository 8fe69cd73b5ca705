//! Backend selection

use std::sync::Arc;

use tracing::warn;

use super::backend::{BackendLauncher, OutputSink, ProcessBackend, SpawnSpec};
use super::pty::NativeLauncher;
use super::simulated::SimulatedLauncher;
use super::TerminalError;
use crate::config::{BackendStrategy, TerminalSettings};

/// Tries a primary launcher and falls back to the simulator when the
/// primary reports that its backend is unavailable.
///
/// Other spawn failures (bad shell, bad cwd) are not masked.
pub struct FallbackLauncher {
    primary: Arc<dyn BackendLauncher>,
    fallback: Arc<dyn BackendLauncher>,
}

impl FallbackLauncher {
    pub fn new(primary: Arc<dyn BackendLauncher>, fallback: Arc<dyn BackendLauncher>) -> Self {
        Self { primary, fallback }
    }
}

impl BackendLauncher for FallbackLauncher {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn launch(
        &self,
        spec: &SpawnSpec,
        sink: OutputSink,
    ) -> Result<Box<dyn ProcessBackend>, TerminalError> {
        match self.primary.launch(spec, sink.clone()) {
            Err(TerminalError::BackendUnavailable(reason)) => {
                warn!(
                    "[termsage:terminal] {} backend unavailable for session {} ({}), using {}",
                    self.primary.name(),
                    spec.session_id,
                    reason,
                    self.fallback.name()
                );
                self.fallback.launch(spec, sink)
            }
            other => other,
        }
    }
}

/// Build the launcher for the configured strategy
pub fn launcher_for(settings: &TerminalSettings) -> Arc<dyn BackendLauncher> {
    match settings.backend {
        BackendStrategy::Native => Arc::new(NativeLauncher::new(settings.spawn_retries)),
        BackendStrategy::Simulated => Arc::new(SimulatedLauncher),
        BackendStrategy::Auto => Arc::new(FallbackLauncher::new(
            Arc::new(NativeLauncher::new(settings.spawn_retries)),
            Arc::new(SimulatedLauncher),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionMode;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    struct Unavailable;

    impl BackendLauncher for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn launch(
            &self,
            _spec: &SpawnSpec,
            _sink: OutputSink,
        ) -> Result<Box<dyn ProcessBackend>, TerminalError> {
            Err(TerminalError::BackendUnavailable("no /dev/ptmx".to_string()))
        }
    }

    struct Broken;

    impl BackendLauncher for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn launch(
            &self,
            _spec: &SpawnSpec,
            _sink: OutputSink,
        ) -> Result<Box<dyn ProcessBackend>, TerminalError> {
            Err(TerminalError::SpawnFailure("no such shell".to_string()))
        }
    }

    fn spec() -> SpawnSpec {
        SpawnSpec {
            session_id: "s".to_string(),
            shell: "/bin/sh".to_string(),
            cwd: PathBuf::from("/"),
            cols: 80,
            rows: 24,
            env: Vec::new(),
        }
    }

    #[test]
    fn test_falls_back_when_unavailable() {
        let launcher = FallbackLauncher::new(Arc::new(Unavailable), Arc::new(SimulatedLauncher));
        let (tx, _rx) = mpsc::unbounded_channel();
        let backend = launcher.launch(&spec(), OutputSink::new(tx, None)).unwrap();
        assert_eq!(backend.mode(), SessionMode::Demo);
    }

    #[test]
    fn test_spawn_failure_is_not_masked() {
        let launcher = FallbackLauncher::new(Arc::new(Broken), Arc::new(SimulatedLauncher));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = launcher.launch(&spec(), OutputSink::new(tx, None));
        assert!(matches!(result, Err(TerminalError::SpawnFailure(_))));
    }
}
