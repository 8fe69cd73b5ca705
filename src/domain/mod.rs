//! Data model shared by the terminal, memory and doctor subsystems.

mod analysis;
mod error_pattern;
mod event;
mod session;

pub use analysis::{
    AnalysisResult, AnalyzeRequest, AppliedFix, ApplyFixRequest, ErrorContext, Fix, FixSource,
};
pub use error_pattern::{ErrorCategory, ErrorRecord, Pattern, Solution};
pub use event::SessionEvent;
pub use session::{
    skip_escape_sequence, CommandRing, ContextSnapshot, DEFAULT_COMMAND_HISTORY,
    DEFAULT_OUTPUT_WINDOW, MAX_PENDING_INPUT, OutputWindow, SessionContext, SessionInfo,
    SessionMode, TerminalSession,
};
