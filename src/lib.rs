//! termsage - terminal sessions with an error memory
//!
//! termsage runs interactive shell sessions for remote clients and watches
//! what they print. Errors are normalized into signatures and the output that
//! followed them is remembered as a fix, so the next time the same error shows
//! up the known remedy comes with it.
//!
//! ## Subsystems
//!
//! 1. **Terminal**: session manager over a native PTY backend, with an
//!    in-memory simulator when PTYs are unavailable.
//!
//! 2. **Memory**: noise filter, error detectors, signature normalization and
//!    a SQLite pattern store shared by all sessions.
//!
//! 3. **Doctor**: on-demand analysis of one error, from deterministic quick
//!    fixes up to an AI assistant.

pub mod config;
pub mod doctor;
pub mod domain;
pub mod memory;
pub mod server;
pub mod terminal;

pub use domain::*;
