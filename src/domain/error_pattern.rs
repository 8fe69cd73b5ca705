//! Learned error patterns and the records they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ContextSnapshot;

/// Classification shared by the error memory and the error doctor.
///
/// Variants are listed in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    CommandNotFound,
    PermissionDenied,
    ModuleNotFound,
    SyntaxError,
    TypeError,
    ReferenceError,
    FileNotFound,
    PortInUse,
    GenericFailure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::CommandNotFound => "command_not_found",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::ModuleNotFound => "module_not_found",
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::TypeError => "type_error",
            ErrorCategory::ReferenceError => "reference_error",
            ErrorCategory::FileNotFound => "file_not_found",
            ErrorCategory::PortInUse => "port_in_use",
            ErrorCategory::GenericFailure => "generic_failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let category = match s {
            "command_not_found" => ErrorCategory::CommandNotFound,
            "permission_denied" => ErrorCategory::PermissionDenied,
            "module_not_found" => ErrorCategory::ModuleNotFound,
            "syntax_error" => ErrorCategory::SyntaxError,
            "type_error" => ErrorCategory::TypeError,
            "reference_error" => ErrorCategory::ReferenceError,
            "file_not_found" => ErrorCategory::FileNotFound,
            "port_in_use" => ErrorCategory::PortInUse,
            "generic_failure" => ErrorCategory::GenericFailure,
            _ => return None,
        };
        Some(category)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed error, kept open until a fix is captured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub raw_text: String,
    pub category: ErrorCategory,
    pub signature: String,
    pub context: ContextSnapshot,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

/// A fix observed after an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub fix_text: String,
    pub confidence: f64,
    pub captured_at: DateTime<Utc>,
    pub session_id: String,
}

/// Aggregate of structurally similar error records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: i64,
    pub signature: String,
    pub category: ErrorCategory,
    pub solutions: Vec<Solution>,
    pub match_count: u64,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_roundtrips_through_str() {
        let all = [
            ErrorCategory::CommandNotFound,
            ErrorCategory::PermissionDenied,
            ErrorCategory::ModuleNotFound,
            ErrorCategory::SyntaxError,
            ErrorCategory::TypeError,
            ErrorCategory::ReferenceError,
            ErrorCategory::FileNotFound,
            ErrorCategory::PortInUse,
            ErrorCategory::GenericFailure,
        ];
        for category in all {
            assert_eq!(ErrorCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(ErrorCategory::parse("nope"), None);
    }
}
