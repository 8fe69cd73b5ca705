//! Terminal session multiplexer
//!
//! [`SessionManager`] owns every session. Each session runs on a
//! [`ProcessBackend`]: a native PTY when the host supports one, otherwise
//! the in-memory simulator.

mod backend;
mod decode;
mod error;
mod manager;
mod pty;
mod registry;
mod simulated;
mod strategy;

pub use backend::{BackendLauncher, OutputSink, ProcessBackend, SpawnSpec};
pub use decode::Utf8Decoder;
pub use error::TerminalError;
pub use manager::{
    Capabilities, CreateOptions, CreatedSession, SessionManager, SessionStat, SessionStats,
};
pub use pty::{pty_available, NativeLauncher, PtyBackend};
pub use simulated::{SimulatedBackend, SimulatedLauncher, ASSISTANT_COMMAND, PROMPT};
pub use strategy::{launcher_for, FallbackLauncher};
