//! Process backend abstraction and the sink backends emit into.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc;

use super::TerminalError;
use crate::domain::{SessionEvent, SessionMode};

/// Everything a launcher needs to start a session's process
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub session_id: String,
    pub shell: String,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub env: Vec<(String, String)>,
}

/// A running process owned by exactly one session.
///
/// Output and termination are reported through the [`OutputSink`] handed to
/// [`BackendLauncher::launch`].
pub trait ProcessBackend: Send {
    fn pid(&self) -> u32;

    fn mode(&self) -> SessionMode;

    /// Forward raw input to the process
    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;

    /// Terminate the process; must not block on process exit
    fn kill(&mut self) -> Result<()>;
}

/// Strategy for constructing backends, chosen once when the manager is built
pub trait BackendLauncher: Send + Sync {
    fn name(&self) -> &'static str;

    fn launch(
        &self,
        spec: &SpawnSpec,
        sink: OutputSink,
    ) -> Result<Box<dyn ProcessBackend>, TerminalError>;
}

struct SinkState {
    client: Option<mpsc::UnboundedSender<SessionEvent>>,
    tap: Option<mpsc::UnboundedSender<String>>,
    /// Events produced before the session was announced
    held: Option<Vec<SessionEvent>>,
}

/// Fan-out point for one session's output.
///
/// Every chunk goes to the client first and is then copied to the learning
/// tap. Both channels are unbounded, so emitting never waits on a consumer.
/// After [`close`](Self::close) returns, no further events reach the client.
#[derive(Clone)]
pub struct OutputSink {
    state: Arc<Mutex<SinkState>>,
    exited: Arc<AtomicBool>,
}

impl OutputSink {
    pub fn new(
        client: mpsc::UnboundedSender<SessionEvent>,
        tap: Option<mpsc::UnboundedSender<String>>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                client: Some(client),
                tap,
                held: Some(Vec::new()),
            })),
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit an output chunk
    pub fn data(&self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.client.is_none() {
            return;
        }

        if let Some(tap) = &state.tap {
            if tap.send(chunk.clone()).is_err() {
                state.tap = None;
            }
        }
        state.deliver(SessionEvent::Data { chunk });
    }

    /// Report process termination; only the first call has an effect
    pub fn exit(&self, exit_code: Option<u32>, signal: Option<String>) {
        if self.exited.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Dropping the tap sender lets the learning worker finish the session
        state.tap = None;
        if state.client.is_some() {
            state.deliver(SessionEvent::Exit { exit_code, signal });
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Announce the session and release anything emitted before it
    pub(crate) fn open(&self, created: SessionEvent) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let held = state.held.take().unwrap_or_default();
        if let Some(client) = &state.client {
            if client.send(created).is_err() {
                tracing::debug!("[termsage:terminal] Client went away before session was announced");
            }
            for event in held {
                let _ = client.send(event);
            }
        }
    }

    /// Detach the client and the tap
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.client = None;
        state.tap = None;
        state.held = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.client.is_none())
            .unwrap_or(true)
    }
}

impl SinkState {
    fn deliver(&mut self, event: SessionEvent) {
        if let Some(held) = self.held.as_mut() {
            held.push(event);
            return;
        }
        if let Some(client) = &self.client {
            // A disconnected client must not stop the tap or the backend
            let _ = client.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_events_are_held_until_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(tx, None);

        sink.data("banner");
        assert!(drain(&mut rx).is_empty());

        sink.open(SessionEvent::Created {
            pid: 7,
            mode: SessionMode::Demo,
        });
        sink.data("after");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SessionEvent::Created { pid: 7, .. }));
        assert_eq!(events[1].as_data(), Some("banner"));
        assert_eq!(events[2].as_data(), Some("after"));
    }

    #[test]
    fn test_nothing_is_delivered_after_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(tx, Some(tap_tx));
        sink.open(SessionEvent::Created {
            pid: 1,
            mode: SessionMode::Demo,
        });
        sink.data("one");
        sink.close();
        sink.data("two");
        sink.exit(Some(0), None);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(tap_rx.try_recv().ok().as_deref(), Some("one"));
        assert!(tap_rx.try_recv().is_err());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_exit_is_reported_once_and_closes_tap() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(tx, Some(tap_tx));
        sink.open(SessionEvent::Created {
            pid: 1,
            mode: SessionMode::Real,
        });
        sink.exit(Some(1), None);
        sink.exit(Some(2), None);

        let exits: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Exit { .. }))
            .collect();
        assert_eq!(
            exits,
            vec![SessionEvent::Exit {
                exit_code: Some(1),
                signal: None
            }]
        );
        assert!(sink.has_exited());
        assert!(matches!(
            tap_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_dropped_client_does_not_break_tap() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new(tx, Some(tap_tx));
        sink.open(SessionEvent::Created {
            pid: 1,
            mode: SessionMode::Demo,
        });
        drop(rx);
        sink.data("still tapped");
        assert_eq!(tap_rx.try_recv().ok().as_deref(), Some("still tapped"));
    }
}
