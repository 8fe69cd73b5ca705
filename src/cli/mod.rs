//! CLI command implementations

pub mod analyze;
pub mod init;
pub mod patterns;
pub mod probe;
pub mod serve;
pub mod shell;
