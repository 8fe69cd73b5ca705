//! Control API request types and shared state

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::doctor::ErrorDoctor;
use crate::domain::SessionEvent;
use crate::memory::ErrorMemory;
use crate::terminal::SessionManager;

/// Events kept per session between polls; the oldest are dropped first
pub const MAX_BACKLOG_EVENTS: usize = 4096;

/// Shared state for the local control API
#[derive(Clone)]
pub struct ServerState {
    pub manager: Arc<SessionManager>,
    pub doctor: Arc<ErrorDoctor>,
    pub memory: Option<Arc<ErrorMemory>>,
    /// Runtime the async session and doctor calls are driven on
    pub runtime: tokio::runtime::Handle,
    pub backlogs: Arc<Mutex<HashMap<String, Arc<Mutex<EventBacklog>>>>>,
}

impl ServerState {
    pub fn new(
        manager: Arc<SessionManager>,
        doctor: Arc<ErrorDoctor>,
        memory: Option<Arc<ErrorMemory>>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            manager,
            doctor,
            memory,
            runtime,
            backlogs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a backlog for `session_id` and start pumping `events` into it.
    ///
    /// The backlog is removed once the session's event stream closes, which
    /// happens when the session is killed or reaped.
    pub fn attach_backlog(
        &self,
        session_id: &str,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Arc<Mutex<EventBacklog>> {
        let backlog = Arc::new(Mutex::new(EventBacklog::default()));
        self.backlogs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), backlog.clone());

        let sink = backlog.clone();
        let backlogs = self.backlogs.clone();
        let id = session_id.to_string();
        self.runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                sink.lock().unwrap_or_else(|e| e.into_inner()).push(event);
            }

            let mut backlogs = backlogs.lock().unwrap_or_else(|e| e.into_inner());
            // A new session may have taken the id in the meantime
            if backlogs
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, &sink))
            {
                backlogs.remove(&id);
                debug!("[termsage:http] Event stream for {} closed", id);
            }
        });
        backlog
    }

    pub fn backlog(&self, session_id: &str) -> Option<Arc<Mutex<EventBacklog>>> {
        self.backlogs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    pub fn detach_backlog(&self, session_id: &str) -> bool {
        self.backlogs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .is_some()
    }
}

/// Events waiting for the next poll
#[derive(Debug, Default)]
pub struct EventBacklog {
    events: VecDeque<SessionEvent>,
    dropped: u64,
}

impl EventBacklog {
    pub fn push(&mut self, event: SessionEvent) {
        if self.events.len() >= MAX_BACKLOG_EVENTS {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Take everything buffered so far, with the count dropped since the last drain
    pub fn drain(&mut self) -> (Vec<SessionEvent>, u64) {
        let dropped = std::mem::take(&mut self.dropped);
        (self.events.drain(..).collect(), dropped)
    }
}

/// POST /sessions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Client-chosen id; generated when absent
    pub id: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub id: String,
    pub pid: u32,
    pub mode: crate::domain::SessionMode,
}

/// POST /sessions/{id}/input
#[derive(Debug, Clone, Deserialize)]
pub struct InputRequest {
    pub data: String,
}

/// POST /sessions/{id}/resize
#[derive(Debug, Clone, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// POST /doctor/toggle
#[derive(Debug, Clone, Deserialize)]
pub struct ToggleRequest {
    #[serde(default)]
    pub scope: Option<String>,
    pub enabled: bool,
}
