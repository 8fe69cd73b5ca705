//! Noise filter and ordered error detectors.
//!
//! Detectors run in [`ErrorCategory`] declaration order and the first match
//! wins: "bash: npm: command not found" also contains the word "found" that a
//! file-not-found detector might react to, and "Error: Cannot find module"
//! would otherwise be swallowed by the generic failure detector.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::ErrorCategory;

/// Benign chatter from shells, package managers and coding assistants.
/// Matched case-insensitively against single lines.
const NOISE_PATTERNS: &[&str] = &[
    r"esc to interrupt",
    r"\? for shortcuts",
    r"auto-accept edits",
    r"bypass permissions",
    r"\b0 errors\b",
    r"\bno errors\b",
    r"\bwithout errors\b",
    r"\berror handling\b",
    r"\berrors: 0\b",
    r"compiled successfully",
    r"\bfound 0 vulnerabilities\b",
    r"thinking(?:…|\.\.\.)",
    r"npm warn deprecated",
    r"npm notice",
];

static NOISE: Lazy<Option<Regex>> = Lazy::new(|| {
    let pattern = format!("(?i){}", NOISE_PATTERNS.join("|"));
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::error!("[termsage:memory] Invalid noise filter: {}", e);
            None
        }
    }
});

/// Spinner and progress glyphs; a chunk made only of these is never an error
const PROGRESS_GLYPHS: &[char] = &[
    '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏', '█', '░', '▒', '▓', '·', '✻', '✽', '✢',
    '*', '.', '-', '=', '>', '|', '/', '\\', '%',
];

struct Detector {
    category: ErrorCategory,
    regex: Regex,
}

static DETECTORS: Lazy<Vec<Detector>> = Lazy::new(|| {
    let table: [(ErrorCategory, &str); 9] = [
        (
            ErrorCategory::CommandNotFound,
            r"(?i)command not found|is not recognized as an internal or external command",
        ),
        (
            ErrorCategory::PermissionDenied,
            r"(?i)permission denied|\bEACCES\b|\bEPERM\b|operation not permitted",
        ),
        (
            ErrorCategory::ModuleNotFound,
            r"(?i)cannot find module|module not found|no module named|\bModuleNotFoundError\b",
        ),
        (ErrorCategory::SyntaxError, r"(?i)\bSyntaxError\b|syntax error"),
        (ErrorCategory::TypeError, r"\bTypeError\b"),
        (ErrorCategory::ReferenceError, r"\bReferenceError\b|\bis not defined\b"),
        (
            ErrorCategory::FileNotFound,
            r"(?i)\bENOENT\b|no such file or directory",
        ),
        (
            ErrorCategory::PortInUse,
            r"(?i)\bEADDRINUSE\b|address already in use|port \d+ (?:is )?already in use",
        ),
        (
            ErrorCategory::GenericFailure,
            r"(?i)(?:^|\s)(?:error|fatal|exception)\s*[:!]|\berror TS\d+\b|\bfound [1-9]\d* errors?\b|\bfailed\b|\bfailure\b|\bpanicked\b",
        ),
    ];

    table
        .into_iter()
        .filter_map(|(category, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(Detector { category, regex }),
            Err(e) => {
                tracing::error!("[termsage:memory] Invalid detector for {}: {}", category, e);
                None
            }
        })
        .collect()
});

fn is_noise_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed
        .chars()
        .all(|c| c.is_whitespace() || c.is_ascii_digit() || PROGRESS_GLYPHS.contains(&c))
    {
        return true;
    }
    NOISE.as_ref().is_some_and(|noise| noise.is_match(trimmed))
}

/// Whether every line of `text` is known harmless output
pub fn is_noise(text: &str) -> bool {
    text.lines().all(is_noise_line)
}

/// `text` without its harmless lines
pub fn strip_noise(text: &str) -> String {
    text.lines()
        .filter(|line| !is_noise_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A classified error and the line it was found on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub category: ErrorCategory,
    pub line: String,
}

/// Classify `text`; harmless lines are dropped first and never classified
pub fn classify(text: &str) -> Option<Detection> {
    let signal = strip_noise(text);
    if signal.is_empty() {
        return None;
    }

    for detector in DETECTORS.iter() {
        if let Some(m) = detector.regex.find(&signal) {
            return Some(Detection {
                category: detector.category,
                line: line_around(&signal, m.start()).to_string(),
            });
        }
    }
    None
}

/// The full line containing byte offset `at`
fn line_around(text: &str, at: usize) -> &str {
    let start = text[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[at..].find('\n').map(|i| at + i).unwrap_or(text.len());
    text[start..end].trim()
}
