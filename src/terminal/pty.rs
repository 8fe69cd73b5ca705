//! Native pseudo-terminal backend
//!
//! Each session gets two OS threads: a reader that relays PTY output into the
//! session's [`OutputSink`], and a waiter that reports the exit status once
//! the shell terminates.

use anyhow::Context;
use once_cell::sync::Lazy;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtyPair, PtySize};
use std::io::{Read, Write};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{BackendLauncher, OutputSink, ProcessBackend, SpawnSpec};
use super::decode::Utf8Decoder;
use super::TerminalError;
use crate::domain::SessionMode;

const READ_CHUNK_SIZE: usize = 4096;

/// How long the waiter lets the reader drain after the shell exits
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

static PTY_AVAILABLE: Lazy<bool> = Lazy::new(|| {
    native_pty_system()
        .openpty(PtySize {
            rows: 1,
            cols: 1,
            pixel_width: 0,
            pixel_height: 0,
        })
        .is_ok()
});

/// Whether this host can open a native PTY (probed once per process)
pub fn pty_available() -> bool {
    *PTY_AVAILABLE
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// A shell running in a native PTY
pub struct PtyBackend {
    pid: u32,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl ProcessBackend for PtyBackend {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn mode(&self) -> SessionMode {
        SessionMode::Real
    }

    fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(data).context("Failed to write to PTY")?;
        self.writer.flush().context("Failed to flush PTY")?;
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.master
            .resize(pty_size(cols, rows))
            .context("Failed to resize PTY")
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        self.killer.kill().context("Failed to kill shell")
    }
}

/// Launches shells in native PTYs
pub struct NativeLauncher {
    retry_attempts: u32,
}

impl NativeLauncher {
    pub fn new(retry_attempts: u32) -> Self {
        Self {
            retry_attempts: retry_attempts.max(1),
        }
    }

    /// Open a PTY, backing off exponentially between attempts
    fn open_with_retry(&self, size: PtySize) -> Result<PtyPair, TerminalError> {
        let mut last_error = String::new();

        for attempt in 0..self.retry_attempts {
            if attempt > 0 {
                let wait = Duration::from_millis(100 * 2_u64.pow(attempt));
                debug!("[termsage:terminal] Retrying PTY creation, attempt {}", attempt + 1);
                thread::sleep(wait);
            }

            match native_pty_system().openpty(size) {
                Ok(pair) => return Ok(pair),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "[termsage:terminal] PTY creation attempt {} failed: {}",
                        attempt + 1,
                        last_error
                    );
                }
            }
        }

        Err(TerminalError::BackendUnavailable(format!(
            "failed to open PTY after {} attempts: {}{}",
            self.retry_attempts,
            last_error,
            exhaustion_hint(&last_error)
        )))
    }
}

fn exhaustion_hint(error: &str) -> &'static str {
    if error.contains("forkpty") || error.contains("Resource temporarily unavailable") {
        " (PTY limit reached; on macOS try `sudo sysctl -w kern.tty.ptmx_max=768`)"
    } else {
        ""
    }
}

impl BackendLauncher for NativeLauncher {
    fn name(&self) -> &'static str {
        "native"
    }

    fn launch(
        &self,
        spec: &SpawnSpec,
        sink: OutputSink,
    ) -> Result<Box<dyn ProcessBackend>, TerminalError> {
        let pair = self.open_with_retry(pty_size(spec.cols, spec.rows))?;

        let mut cmd = CommandBuilder::new(&spec.shell);
        cmd.cwd(&spec.cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            let msg = e.to_string();
            TerminalError::SpawnFailure(format!("{}{}", msg, exhaustion_hint(&msg)))
        })?;
        // Holding the slave open would keep the reader from ever seeing EOF
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::SpawnFailure(format!("failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::SpawnFailure(format!("failed to take PTY writer: {}", e)))?;

        let pid = child.process_id().unwrap_or(0);
        let killer = child.clone_killer();

        let (done_tx, done_rx) = std_mpsc::channel::<()>();
        let reader_sink = sink.clone();
        thread::Builder::new()
            .name(format!("termsage-pty-read-{}", spec.session_id))
            .spawn(move || {
                relay_output(reader, &reader_sink);
                let _ = done_tx.send(());
            })
            .map_err(|e| TerminalError::SpawnFailure(format!("failed to start reader: {}", e)))?;

        let session_id = spec.session_id.clone();
        thread::Builder::new()
            .name(format!("termsage-pty-wait-{}", spec.session_id))
            .spawn(move || {
                let status = child.wait();
                // Let trailing output reach the client before the exit event
                let _ = done_rx.recv_timeout(READER_DRAIN_TIMEOUT);
                match status {
                    Ok(status) => {
                        debug!(
                            "[termsage:terminal] Shell for session {} exited: {:?}",
                            session_id, status
                        );
                        sink.exit(
                            Some(status.exit_code()),
                            status.signal().map(str::to_string),
                        );
                    }
                    Err(e) => {
                        warn!(
                            "[termsage:terminal] Failed to wait for session {}: {}",
                            session_id, e
                        );
                        sink.exit(None, None);
                    }
                }
            })
            .map_err(|e| TerminalError::SpawnFailure(format!("failed to start waiter: {}", e)))?;

        info!(
            "[termsage:terminal] PTY session {} started (pid {}, shell {})",
            spec.session_id, pid, spec.shell
        );

        Ok(Box::new(PtyBackend {
            pid,
            master: pair.master,
            writer,
            killer,
        }))
    }
}

fn relay_output(mut reader: Box<dyn Read + Send>, sink: &OutputSink) {
    let mut decoder = Utf8Decoder::new();
    let mut buffer = [0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.push(&buffer[..n]);
                if !text.is_empty() {
                    sink.data(text);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO is the normal end of stream on Linux once the shell exits
                debug!("[termsage:terminal] PTY read ended: {}", e);
                break;
            }
        }
        if sink.is_closed() {
            break;
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        sink.data(rest);
    }
}
