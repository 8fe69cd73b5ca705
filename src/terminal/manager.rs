//! Session manager: owns the registry and multiplexes client I/O.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{BackendLauncher, OutputSink, SpawnSpec};
use super::registry::{SessionEntry, SessionRegistry};
use super::strategy::launcher_for;
use super::{pty_available, TerminalError};
use crate::config::TerminalSettings;
use crate::domain::{SessionContext, SessionEvent, SessionInfo, SessionMode, TerminalSession};
use crate::memory::ErrorMemory;

/// Optional parameters of [`SessionManager::create`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOptions {
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
    /// Defaults to the user's home directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// Returned from a successful create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub pid: u32,
    pub mode: SessionMode,
}

/// Capability probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub pty_available: bool,
    pub platform: String,
    pub shell: String,
    pub home: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStat {
    pub id: String,
    pub mode: SessionMode,
    pub age_seconds: u64,
    pub idle_seconds: u64,
    pub ended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub sessions: Vec<SessionStat>,
    pub platform: String,
    pub shell: String,
}

/// Owns every live session.
///
/// The registry lock is only held for lookups and bookkeeping; backend I/O
/// happens on per-session locks so one session never waits on another.
pub struct SessionManager {
    registry: Mutex<SessionRegistry>,
    launcher: Arc<dyn BackendLauncher>,
    memory: Option<Arc<ErrorMemory>>,
    settings: TerminalSettings,
}

impl SessionManager {
    /// Manager using the backend strategy from `settings`
    pub fn new(settings: TerminalSettings, memory: Option<Arc<ErrorMemory>>) -> Self {
        let launcher = launcher_for(&settings);
        Self::with_launcher(settings, launcher, memory)
    }

    pub fn with_launcher(
        settings: TerminalSettings,
        launcher: Arc<dyn BackendLauncher>,
        memory: Option<Arc<ErrorMemory>>,
    ) -> Self {
        Self {
            registry: Mutex::new(SessionRegistry::new()),
            launcher,
            memory,
            settings,
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, SessionRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a session and attach `events` as its client channel.
    ///
    /// On success the client receives `created` before any output. On
    /// failure it receives a single `error` event and nothing is registered.
    pub async fn create(
        &self,
        session_id: &str,
        options: CreateOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<CreatedSession, TerminalError> {
        match self.try_create(session_id, options, &events).await {
            Ok(created) => Ok(created),
            Err(e) => {
                warn!("[termsage:terminal] Failed to create session {}: {}", session_id, e);
                let _ = events.send(SessionEvent::error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn try_create(
        &self,
        session_id: &str,
        options: CreateOptions,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<CreatedSession, TerminalError> {
        if self.registry().contains(session_id) {
            return Err(TerminalError::DuplicateSession(session_id.to_string()));
        }
        self.ensure_capacity()?;

        let cols = options.cols.unwrap_or(self.settings.default_cols);
        let rows = options.rows.unwrap_or(self.settings.default_rows);
        let cwd = options
            .cwd
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"));

        let context = Arc::new(Mutex::new(SessionContext::with_caps(
            session_id,
            cwd.clone(),
            self.settings.command_history,
            self.settings.output_buffer_chars,
        )));

        let tap = self.memory.as_ref().map(|memory| {
            let (tap_tx, tap_rx) = mpsc::unbounded_channel();
            tokio::spawn(run_tap(memory.clone(), context.clone(), tap_rx));
            tap_tx
        });
        let sink = OutputSink::new(events.clone(), tap);

        let spec = SpawnSpec {
            session_id: session_id.to_string(),
            shell: self.settings.resolve_shell(),
            cwd: cwd.clone(),
            cols,
            rows,
            env: Vec::new(),
        };

        // Launchers may block (PTY retries back off with sleeps)
        let launcher = self.launcher.clone();
        let launch_sink = sink.clone();
        let launched = tokio::task::spawn_blocking(move || launcher.launch(&spec, launch_sink))
            .await
            .map_err(|e| TerminalError::SpawnFailure(format!("launcher panicked: {}", e)));

        let mut backend = match launched.and_then(|r| r) {
            Ok(backend) => backend,
            Err(e) => {
                sink.close();
                return Err(e);
            }
        };

        let created = CreatedSession {
            pid: backend.pid(),
            mode: backend.mode(),
        };

        {
            let mut registry = self.registry();
            if registry.contains(session_id) {
                // Lost a race with a concurrent create for the same id
                drop(registry);
                sink.close();
                let _ = backend.kill();
                return Err(TerminalError::DuplicateSession(session_id.to_string()));
            }
            registry.insert(SessionEntry {
                session: TerminalSession {
                    id: session_id.to_string(),
                    pid: created.pid,
                    mode: created.mode,
                    cwd,
                    cols,
                    rows,
                    killed: false,
                    created_at: Utc::now(),
                },
                backend: Arc::new(Mutex::new(backend)),
                context,
                sink: sink.clone(),
                last_activity: Instant::now(),
            });
        }

        sink.open(SessionEvent::Created {
            pid: created.pid,
            mode: created.mode,
        });

        info!(
            "[termsage:terminal] Session {} created (pid {}, mode {}), active sessions: {}",
            session_id,
            created.pid,
            created.mode,
            self.registry().len()
        );

        Ok(created)
    }

    fn ensure_capacity(&self) -> Result<(), TerminalError> {
        let max = self.settings.max_sessions;
        if self.registry().len() < max {
            return Ok(());
        }

        self.cleanup_idle(Duration::from_secs(self.settings.idle_timeout_secs));
        if self.registry().len() >= max {
            return Err(TerminalError::SessionLimit(max));
        }
        Ok(())
    }

    /// Forward input to a session. Unknown or ended sessions drop it.
    pub fn write(&self, session_id: &str, data: &[u8]) {
        let (backend, context) = {
            let mut registry = self.registry();
            match registry.get_mut(session_id) {
                Some(entry) if !entry.sink.has_exited() => {
                    entry.last_activity = Instant::now();
                    (entry.backend.clone(), entry.context.clone())
                }
                Some(_) => {
                    debug!("[termsage:terminal] Dropping write to ended session {}", session_id);
                    return;
                }
                None => {
                    debug!("[termsage:terminal] Dropping write to unknown session {}", session_id);
                    return;
                }
            }
        };

        context
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_input(&String::from_utf8_lossy(data));

        let mut backend = backend.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = backend.write(data) {
            warn!("[termsage:terminal] Write to session {} failed: {:#}", session_id, e);
        }
    }

    /// Resize a session's terminal; ignored for ended or unknown sessions
    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) {
        let backend = {
            let mut registry = self.registry();
            match registry.get_mut(session_id) {
                Some(entry) if !entry.sink.has_exited() => {
                    entry.session.cols = cols;
                    entry.session.rows = rows;
                    entry.last_activity = Instant::now();
                    entry.backend.clone()
                }
                _ => {
                    debug!("[termsage:terminal] Ignoring resize for session {}", session_id);
                    return;
                }
            }
        };

        let mut backend = backend.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = backend.resize(cols, rows) {
            warn!("[termsage:terminal] Resize of session {} failed: {:#}", session_id, e);
        }
    }

    /// Terminate a session.
    ///
    /// The session is unregistered and its client detached before this
    /// returns; no event for `session_id` is delivered afterwards.
    pub fn kill(&self, session_id: &str) -> bool {
        let Some(entry) = self.registry().remove(session_id) else {
            debug!("[termsage:terminal] Kill for unknown session {}", session_id);
            return false;
        };

        entry.sink.close();
        let mut backend = entry.backend.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = backend.kill() {
            // The process may already be gone
            debug!("[termsage:terminal] Kill of session {} reported: {:#}", session_id, e);
        }

        info!(
            "[termsage:terminal] Session {} closed, active sessions: {}",
            session_id,
            self.registry().len()
        );
        true
    }

    /// Kill every session
    pub fn shutdown(&self) {
        let entries = self.registry().drain();
        for entry in entries {
            entry.sink.close();
            let mut backend = entry.backend.lock().unwrap_or_else(|e| e.into_inner());
            let _ = backend.kill();
        }
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let registry = self.registry();
        let mut sessions: Vec<SessionInfo> = registry.iter().map(|e| e.session.info()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Snapshot of one session, with `killed` reflecting backend exit
    pub fn session(&self, session_id: &str) -> Option<TerminalSession> {
        let registry = self.registry();
        registry.get(session_id).map(|entry| {
            let mut session = entry.session.clone();
            session.killed = entry.sink.has_exited();
            session
        })
    }

    /// Copy of a session's context
    pub fn context(&self, session_id: &str) -> Option<SessionContext> {
        let context = self.registry().get(session_id)?.context.clone();
        let guard = context.lock().unwrap_or_else(|e| e.into_inner());
        Some(guard.clone())
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            pty_available: pty_available(),
            platform: std::env::consts::OS.to_string(),
            shell: self.settings.resolve_shell(),
            home: dirs::home_dir(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        let now = Instant::now();
        let registry = self.registry();
        let sessions = registry
            .iter()
            .map(|entry| SessionStat {
                id: entry.session.id.clone(),
                mode: entry.session.mode,
                age_seconds: (Utc::now() - entry.session.created_at).num_seconds().max(0) as u64,
                idle_seconds: now.duration_since(entry.last_activity).as_secs(),
                ended: entry.sink.has_exited(),
            })
            .collect();

        SessionStats {
            active_sessions: registry.len(),
            max_sessions: self.settings.max_sessions,
            sessions,
            platform: std::env::consts::OS.to_string(),
            shell: self.settings.resolve_shell(),
        }
    }

    /// Kill sessions without client input for longer than `idle`
    pub fn cleanup_idle(&self, idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let idle_ids: Vec<String> = self
            .registry()
            .iter()
            .filter(|entry| now.duration_since(entry.last_activity) > idle)
            .map(|entry| entry.session.id.clone())
            .collect();

        for id in &idle_ids {
            info!("[termsage:terminal] Reaping idle session {}", id);
            self.kill(id);
        }
        idle_ids
    }

    /// Periodically reap idle sessions
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let interval = Duration::from_secs(self.settings.cleanup_interval_secs.max(1));
        let idle = Duration::from_secs(self.settings.idle_timeout_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.cleanup_idle(idle);
            }
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Feed one session's output to the error memory, in order, off the relay path
async fn run_tap(
    memory: Arc<ErrorMemory>,
    context: Arc<Mutex<SessionContext>>,
    mut chunks: mpsc::UnboundedReceiver<String>,
) {
    while let Some(chunk) = chunks.recv().await {
        let memory_ref = memory.clone();
        let context_ref = context.clone();
        let outcome =
            tokio::task::spawn_blocking(move || memory_ref.observe(&chunk, &context_ref)).await;

        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("[termsage:memory] Capture failed: {}", e),
            Err(e) => warn!("[termsage:memory] Capture task aborted: {}", e),
        }
    }

    let _ = tokio::task::spawn_blocking(move || memory.end_session(&context)).await;
}
