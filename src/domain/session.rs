//! Terminal session records and the per-session context window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::iter::Peekable;
use std::path::PathBuf;

/// Default number of commands remembered per session
pub const DEFAULT_COMMAND_HISTORY: usize = 10;

/// Default size of the sliding output window, in characters
pub const DEFAULT_OUTPUT_WINDOW: usize = 1000;

/// Longest unterminated input line kept; older keystrokes are dropped
pub const MAX_PENDING_INPUT: usize = 4096;

/// Which process backend a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Native pseudo-terminal running a real shell
    Real,
    /// In-memory simulator used when no PTY is available
    Demo,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Real => write!(f, "real"),
            SessionMode::Demo => write!(f, "demo"),
        }
    }
}

/// A registered terminal session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSession {
    pub id: String,
    pub pid: u32,
    pub mode: SessionMode,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    /// Set once the backend has exited or the session was killed
    pub killed: bool,
    pub created_at: DateTime<Utc>,
}

impl TerminalSession {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            pid: self.pid,
            created_at: self.created_at,
            mode: self.mode,
        }
    }
}

/// Introspection view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    pub mode: SessionMode,
}

/// FIFO ring with a fixed capacity; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct CommandRing {
    items: VecDeque<String>,
    cap: usize,
}

impl CommandRing {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            items: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, command: String) {
        if self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(command);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// All commands, oldest first
    pub fn to_vec(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }

    /// The last `n` commands, oldest first
    pub fn last_n(&self, n: usize) -> Vec<String> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }
}

/// Sliding window over the most recent output, bounded in characters.
#[derive(Debug, Clone)]
pub struct OutputWindow {
    buf: VecDeque<char>,
    cap: usize,
}

impl OutputWindow {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push_str(&mut self, chunk: &str) {
        for c in chunk.chars() {
            if self.buf.len() >= self.cap {
                self.buf.pop_front();
            }
            self.buf.push_back(c);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn contents(&self) -> String {
        self.buf.iter().collect()
    }

    /// Remove the newest character
    pub fn pop(&mut self) -> Option<char> {
        self.buf.pop_back()
    }

    /// Empty the window, returning what it held
    pub fn take(&mut self) -> String {
        self.buf.drain(..).collect()
    }
}

/// Consume the rest of an escape sequence whose ESC was just read.
///
/// Handles CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL` or `ESC ] ... ESC \`),
/// SS3 (`ESC O x`) and two-character sequences.
pub fn skip_escape_sequence<I: Iterator<Item = char>>(chars: &mut Peekable<I>) {
    match chars.next() {
        Some('[') => {
            for next in chars.by_ref() {
                if ('@'..='~').contains(&next) {
                    break;
                }
            }
        }
        Some(']') => {
            while let Some(next) = chars.next() {
                if next == '\x07' {
                    break;
                }
                if next == '\x1b' && chars.peek() == Some(&'\\') {
                    chars.next();
                    break;
                }
            }
        }
        Some('O') => {
            chars.next();
        }
        _ => {}
    }
}

/// Context tracked alongside every session and fed to the error memory.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub working_directory: PathBuf,
    pub last_commands: CommandRing,
    pub output_buffer: OutputWindow,
    /// Error record waiting for a fix, if any
    pub current_error_id: Option<String>,
    /// Substantive chunks still allowed before the open error is dropped
    pub fix_window_remaining: usize,
    /// Input typed since the last line terminator
    pending_input: OutputWindow,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, working_directory: PathBuf) -> Self {
        Self::with_caps(
            session_id,
            working_directory,
            DEFAULT_COMMAND_HISTORY,
            DEFAULT_OUTPUT_WINDOW,
        )
    }

    pub fn with_caps(
        session_id: impl Into<String>,
        working_directory: PathBuf,
        command_cap: usize,
        output_cap: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory,
            last_commands: CommandRing::new(command_cap),
            output_buffer: OutputWindow::new(output_cap),
            current_error_id: None,
            fix_window_remaining: 0,
            pending_input: OutputWindow::new(MAX_PENDING_INPUT),
        }
    }

    /// Track typed input; every completed line lands in `last_commands`.
    pub fn record_input(&mut self, data: &str) {
        let mut chars = data.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                // Arrow keys and other editing sequences
                '\x1b' => skip_escape_sequence(&mut chars),
                '\r' | '\n' => {
                    let line = self.pending_input.take();
                    let line = line.trim();
                    if !line.is_empty() {
                        self.last_commands.push(line.to_string());
                    }
                }
                // DEL and BS
                '\u{7f}' | '\u{8}' => {
                    self.pending_input.pop();
                }
                c if c.is_control() => {}
                c => self.pending_input.push_str(c.encode_utf8(&mut [0u8; 4])),
            }
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            session_id: self.session_id.clone(),
            cwd: self.working_directory.clone(),
            last_commands: self.last_commands.to_vec(),
        }
    }
}

/// Frozen copy of the context stored with an error record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub cwd: PathBuf,
    pub last_commands: Vec<String>,
}
