/// Errors surfaced while creating a session.
///
/// Once a session is registered, backend failures are reported as an
/// `exit` event instead.
#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("PTY backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Failed to spawn shell: {0}")]
    SpawnFailure(String),

    #[error("Maximum number of sessions ({0}) reached")]
    SessionLimit(usize),

    #[error("Session already exists: {0}")]
    DuplicateSession(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
