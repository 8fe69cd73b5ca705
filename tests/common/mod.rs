//! Shared test utilities for session, memory and doctor integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use termsage::config::{BackendStrategy, TerminalSettings};
use termsage::doctor::{AiProvider, DoctorError};
use termsage::terminal::{BackendLauncher, OutputSink, ProcessBackend, SpawnSpec, TerminalError};
use termsage::{FixSource, SessionEvent};

/// Terminal settings that always use the simulator
pub fn simulated_settings(max_sessions: usize) -> TerminalSettings {
    TerminalSettings {
        backend: BackendStrategy::Simulated,
        max_sessions,
        ..Default::default()
    }
}

/// A launcher that behaves like a host without PTY support
pub struct NoPtyLauncher;

impl BackendLauncher for NoPtyLauncher {
    fn name(&self) -> &'static str {
        "no-pty"
    }

    fn launch(
        &self,
        _spec: &SpawnSpec,
        _sink: OutputSink,
    ) -> Result<Box<dyn ProcessBackend>, TerminalError> {
        Err(TerminalError::BackendUnavailable(
            "openpty: no such device".to_string(),
        ))
    }
}

/// Receive events until `done` returns true for one of them, or `timeout` passes
pub async fn recv_until(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    timeout: Duration,
    done: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Some(event) = rx.recv().await {
            let finished = done(&event);
            events.push(event);
            if finished {
                break;
            }
        }
    })
    .await;
    events
}

/// Everything received within `timeout`
pub async fn drain_for(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    timeout: Duration,
) -> Vec<SessionEvent> {
    recv_until(rx, timeout, |_| false).await
}

/// Concatenated output of the data events
pub fn output_text(events: &[SessionEvent]) -> String {
    events.iter().filter_map(|e| e.as_data()).collect()
}

/// Scripted AI provider that counts its calls
pub struct FakeProvider {
    pub name: &'static str,
    pub source: FixSource,
    pub available: bool,
    pub reply: Result<String, &'static str>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeProvider {
    pub fn replying(name: &'static str, source: FixSource, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name,
            source,
            available: true,
            reply: Ok(reply.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &'static str, source: FixSource) -> Arc<Self> {
        Arc::new(Self {
            name,
            source,
            available: true,
            reply: Err("exit status 1"),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unavailable(name: &'static str, source: FixSource) -> Arc<Self> {
        Arc::new(Self {
            name,
            source,
            available: false,
            reply: Err("not installed"),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for FakeProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn source(&self) -> FixSource {
        self.source
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn complete(&self, _prompt: &str) -> Result<String, DoctorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply
            .clone()
            .map_err(|e| DoctorError::Provider(e.to_string()))
    }
}
