//! Error pattern memory
//!
//! Watches session output for errors, normalizes them into signatures and
//! learns which output followed them as a fix. Patterns live in SQLite and
//! survive restarts.

mod db;
mod detector;
mod signature;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::MemorySettings;
use crate::domain::{ErrorCategory, ErrorRecord, Pattern, SessionContext, Solution};

pub use db::{confidence_for, MemoryStats, PatternDb, MAX_CONFIDENCE};
pub use detector::{classify, is_noise, strip_noise, Detection};
pub use signature::{normalize, similarity, strip_ansi};

/// Confidence assigned to a freshly captured fix
const INITIAL_SOLUTION_CONFIDENCE: f64 = 0.5;

/// Longest raw error text stored with a record
const MAX_RAW_TEXT_CHARS: usize = 2000;

/// Longest fix text stored
const MAX_FIX_CHARS: usize = 500;

/// Chunks shorter than this (after trimming) are keystroke echoes
const MIN_SUBSTANTIVE_CHARS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Pattern store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of [`ErrorMemory::capture_error`]
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    /// No error in the chunk
    Ignored,
    /// A stored pattern matched. `error_id` is set when the pattern has no
    /// solution yet and a new record was opened to learn one.
    Matched {
        pattern: Pattern,
        similarity: f64,
        confidence: f64,
        error_id: Option<String>,
    },
    /// A new error; its record is open for fix correlation
    Recorded {
        error_id: String,
        category: ErrorCategory,
        signature: String,
    },
}

impl Capture {
    pub fn is_matched(&self) -> bool {
        matches!(self, Capture::Matched { .. })
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            Capture::Matched { confidence, .. } => Some(*confidence),
            _ => None,
        }
    }

    pub fn error_id(&self) -> Option<&str> {
        match self {
            Capture::Matched { error_id, .. } => error_id.as_deref(),
            Capture::Recorded { error_id, .. } => Some(error_id),
            Capture::Ignored => None,
        }
    }
}

/// What the tap did with one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Ignored,
    Error(Capture),
    Fix(Solution),
    /// An error is open and the chunk did not resolve it
    Waiting,
}

/// Shared learning store
pub struct ErrorMemory {
    db: PatternDb,
    settings: MemorySettings,
}

impl ErrorMemory {
    /// Open the store configured in `settings`
    pub fn open(settings: &MemorySettings) -> Result<Self, MemoryError> {
        Self::open_at(&settings.resolve_db_path(), settings)
    }

    pub fn open_at(path: &Path, settings: &MemorySettings) -> Result<Self, MemoryError> {
        let db = PatternDb::open(path)?;
        info!("[termsage:memory] Pattern store at {}", path.display());
        Ok(Self {
            db,
            settings: settings.clone(),
        })
    }

    pub fn open_in_memory(settings: &MemorySettings) -> Result<Self, MemoryError> {
        Ok(Self {
            db: PatternDb::open_in_memory()?,
            settings: settings.clone(),
        })
    }

    /// Open the store if learning is enabled. A store that cannot be opened
    /// disables learning instead of failing the caller.
    pub fn open_optional(settings: &MemorySettings) -> Option<Arc<Self>> {
        if !settings.enabled {
            info!("[termsage:memory] Pattern learning disabled");
            return None;
        }
        match Self::open(settings) {
            Ok(memory) => Some(Arc::new(memory)),
            Err(e) => {
                warn!("[termsage:memory] Pattern store unavailable, learning disabled: {}", e);
                None
            }
        }
    }

    /// Classify `chunk` and look it up.
    ///
    /// When a record is opened, `context.current_error_id` points at it and
    /// the fix window is reset.
    pub fn capture_error(
        &self,
        chunk: &str,
        context: &mut SessionContext,
    ) -> Result<Capture, MemoryError> {
        let text = strip_ansi(chunk);
        let Some(detection) = classify(&text) else {
            return Ok(Capture::Ignored);
        };
        let signature = normalize(&detection.line);

        if let Some((pattern_id, similarity)) = self.find_match(&signature, detection.category)? {
            let (match_count, confidence) = self.db.record_match(pattern_id)?;
            let Some(pattern) = self.db.load_pattern(pattern_id)? else {
                return Ok(Capture::Ignored);
            };
            debug!(
                "[termsage:memory] Matched pattern {} ({}), count {}, confidence {:.2}",
                pattern_id, detection.category, match_count, confidence
            );

            let error_id = if pattern.solutions.is_empty() {
                Some(self.open_record(&text, &detection, &signature, pattern_id, context)?)
            } else {
                None
            };

            return Ok(Capture::Matched {
                pattern,
                similarity,
                confidence,
                error_id,
            });
        }

        let pattern_id = self.db.insert_pattern(&signature, detection.category)?;
        let error_id = self.open_record(&text, &detection, &signature, pattern_id, context)?;
        info!(
            "[termsage:memory] New {} error in session {}: {}",
            detection.category, context.session_id, signature
        );

        Ok(Capture::Recorded {
            error_id,
            category: detection.category,
            signature,
        })
    }

    /// Store `candidate` as the fix for `error_id` if it is plausible.
    ///
    /// Only the first plausible candidate for an error is kept.
    pub fn capture_fix(
        &self,
        candidate: &str,
        error_id: &str,
        context: &mut SessionContext,
    ) -> Result<Option<Solution>, MemoryError> {
        let Some(fix_text) = self.plausible_fix(candidate) else {
            return Ok(None);
        };

        let solution = Solution {
            fix_text,
            confidence: INITIAL_SOLUTION_CONFIDENCE,
            captured_at: Utc::now(),
            session_id: context.session_id.clone(),
        };
        let stored = self.db.resolve_with_solution(error_id, &solution)?;

        if context.current_error_id.as_deref() == Some(error_id) {
            context.current_error_id = None;
            context.fix_window_remaining = 0;
        }

        match stored {
            Some(pattern_id) => {
                info!(
                    "[termsage:memory] Learned fix for pattern {}: {}",
                    pattern_id,
                    solution.fix_text.lines().next().unwrap_or_default()
                );
                Ok(Some(solution))
            }
            None => Ok(None),
        }
    }

    /// Tap entry point: process one output chunk in session order
    pub fn observe(
        &self,
        chunk: &str,
        context: &Mutex<SessionContext>,
    ) -> Result<Observation, MemoryError> {
        let text = strip_ansi(chunk);

        // Work on a copy so typing into the session never waits on the store
        let mut working = {
            let mut guard = context.lock().unwrap_or_else(|e| e.into_inner());
            guard.output_buffer.push_str(&text);
            guard.clone()
        };

        let result = self.observe_text(&text, &mut working);

        let mut guard = context.lock().unwrap_or_else(|e| e.into_inner());
        guard.current_error_id = working.current_error_id;
        guard.fix_window_remaining = working.fix_window_remaining;
        result
    }

    fn observe_text(
        &self,
        text: &str,
        context: &mut SessionContext,
    ) -> Result<Observation, MemoryError> {
        if content_lines(text).chars().count() < MIN_SUBSTANTIVE_CHARS {
            return Ok(Observation::Ignored);
        }

        if let Some(error_id) = context.current_error_id.clone() {
            if let Some(solution) = self.capture_fix(text, &error_id, context)? {
                return Ok(Observation::Fix(solution));
            }

            if classify(text).is_none() {
                context.fix_window_remaining = context.fix_window_remaining.saturating_sub(1);
                if context.fix_window_remaining == 0 {
                    debug!(
                        "[termsage:memory] No fix seen for error {} in session {}",
                        error_id, context.session_id
                    );
                    context.current_error_id = None;
                }
                return Ok(Observation::Waiting);
            }
        }

        match self.capture_error(text, context)? {
            Capture::Ignored => Ok(Observation::Ignored),
            capture => Ok(Observation::Error(capture)),
        }
    }

    /// Close any open error when its session goes away
    pub fn end_session(&self, context: &Mutex<SessionContext>) {
        let mut guard = context.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(error_id) = guard.current_error_id.take() {
            debug!(
                "[termsage:memory] Session {} ended with error {} unresolved",
                guard.session_id, error_id
            );
        }
        guard.fix_window_remaining = 0;
    }

    /// Look up the pattern for `text` without counting a match
    pub fn solutions_for(&self, text: &str) -> Result<Option<Pattern>, MemoryError> {
        let clean = strip_ansi(text);
        let Some(detection) = classify(&clean) else {
            return Ok(None);
        };
        let signature = normalize(&detection.line);
        match self.find_match(&signature, detection.category)? {
            Some((pattern_id, _)) => self.db.load_pattern(pattern_id),
            None => Ok(None),
        }
    }

    pub fn list_patterns(&self, limit: usize) -> Result<Vec<Pattern>, MemoryError> {
        self.db.list_patterns(limit)
    }

    pub fn record(&self, error_id: &str) -> Result<Option<ErrorRecord>, MemoryError> {
        self.db.load_record(error_id)
    }

    pub fn stats(&self) -> Result<MemoryStats, MemoryError> {
        self.db.stats()
    }

    /// Exact signature first, then the most similar one in the same category
    fn find_match(
        &self,
        signature: &str,
        category: ErrorCategory,
    ) -> Result<Option<(i64, f64)>, MemoryError> {
        if let Some(id) = self.db.find_exact(signature, category)? {
            return Ok(Some((id, 1.0)));
        }

        let best = self
            .db
            .signatures(category)?
            .into_iter()
            .map(|(id, stored)| (id, similarity(signature, &stored)))
            .filter(|(_, score)| *score >= self.settings.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(best)
    }

    fn open_record(
        &self,
        text: &str,
        detection: &Detection,
        signature: &str,
        pattern_id: i64,
        context: &mut SessionContext,
    ) -> Result<String, MemoryError> {
        let record = ErrorRecord {
            id: uuid::Uuid::new_v4().to_string(),
            raw_text: text.trim().chars().take(MAX_RAW_TEXT_CHARS).collect(),
            category: detection.category,
            signature: signature.to_string(),
            context: context.snapshot(),
            timestamp: Utc::now(),
            resolved: false,
        };
        self.db.insert_record(&record, pattern_id)?;

        context.current_error_id = Some(record.id.clone());
        context.fix_window_remaining = self.settings.fix_capture_window.max(1);
        Ok(record.id)
    }

    /// Fix text for `candidate`, or `None` if it does not look like a fix
    fn plausible_fix(&self, candidate: &str) -> Option<String> {
        let content = strip_noise(&content_lines(&strip_ansi(candidate)));
        if content.chars().count() < self.settings.min_fix_len {
            return None;
        }
        if classify(&content).is_some() {
            return None;
        }
        Some(content.chars().take(MAX_FIX_CHARS).collect())
    }
}

/// Non-empty lines of `text`, without a trailing shell prompt
fn content_lines(text: &str) -> String {
    let mut lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.last().is_some_and(|l| is_prompt_line(l)) {
        lines.pop();
    }
    lines.join("\n")
}

/// Shell prompts and interactive questions
fn is_prompt_line(line: &str) -> bool {
    let line = line.trim();
    if line.chars().count() > 80 {
        return false;
    }
    let lower = line.to_lowercase();
    if lower.contains("(y/n)") || lower.contains("[y/n]") || lower.ends_with("password:") {
        return true;
    }
    line.ends_with(['$', '#', '%', '>', '❯', '➜', '›'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn memory() -> ErrorMemory {
        ErrorMemory::open_in_memory(&MemorySettings::default()).unwrap()
    }

    fn context() -> SessionContext {
        SessionContext::new("s1", PathBuf::from("/tmp"))
    }

    #[test]
    fn test_prompt_detection() {
        assert!(is_prompt_line("$"));
        assert!(is_prompt_line("ana@box:~/app$"));
        assert!(is_prompt_line("Proceed? (y/N)"));
        assert!(!is_prompt_line("added 1 package"));
        assert_eq!(content_lines("added 1 package\r\n$ "), "added 1 package");
    }

    #[test]
    fn test_first_sighting_records_then_matches() {
        let memory = memory();
        let mut ctx = context();

        let first = memory.capture_error("Error: Cannot find module 'chalk'", &mut ctx).unwrap();
        assert!(matches!(first, Capture::Recorded { category: ErrorCategory::ModuleNotFound, .. }));
        assert_eq!(ctx.current_error_id.as_deref(), first.error_id());

        let second = memory.capture_error("Error: Cannot find module 'chalk'", &mut ctx).unwrap();
        assert!(second.is_matched());
        // Still no solution, so a fresh record is opened
        assert!(second.error_id().is_some());
    }

    #[test]
    fn test_noise_is_ignored() {
        let memory = memory();
        let mut ctx = context();
        let capture = memory.capture_error("Compiled successfully, 0 errors", &mut ctx).unwrap();
        assert_eq!(capture, Capture::Ignored);
        assert!(ctx.current_error_id.is_none());
    }

    #[test]
    fn test_short_candidates_are_not_fixes() {
        let memory = memory();
        let mut ctx = context();
        let capture = memory.capture_error("bash: yarn: command not found", &mut ctx).unwrap();
        let error_id = capture.error_id().unwrap().to_string();

        assert!(memory.capture_fix("ok", &error_id, &mut ctx).unwrap().is_none());
        assert!(memory.capture_fix("$ ", &error_id, &mut ctx).unwrap().is_none());
        assert!(ctx.current_error_id.is_some());

        let solution = memory
            .capture_fix("npm install -g yarn\nadded 1 package", &error_id, &mut ctx)
            .unwrap()
            .unwrap();
        assert_eq!(solution.fix_text, "npm install -g yarn\nadded 1 package");
        assert!(ctx.current_error_id.is_none());
    }

    #[test]
    fn test_fix_window_expires() {
        let settings = MemorySettings {
            fix_capture_window: 2,
            ..Default::default()
        };
        let memory = ErrorMemory::open_in_memory(&settings).unwrap();
        let ctx = Mutex::new(context());

        memory.observe("TypeError: x is not a function\r\n", &ctx).unwrap();
        assert!(ctx.lock().unwrap().current_error_id.is_some());

        // Prompts and echoes do not use up the window
        memory.observe("$ ", &ctx).unwrap();
        memory.observe("l", &ctx).unwrap();
        assert!(ctx.lock().unwrap().current_error_id.is_some());

        assert_eq!(memory.observe("ls\r\n", &ctx).unwrap(), Observation::Ignored);
        assert_eq!(memory.observe("abc\r\n", &ctx).unwrap(), Observation::Waiting);
        assert_eq!(memory.observe("def\r\n", &ctx).unwrap(), Observation::Waiting);
        assert!(ctx.lock().unwrap().current_error_id.is_none());
    }

    #[test]
    fn test_end_session_closes_open_error() {
        let memory = memory();
        let ctx = Mutex::new(context());
        memory.observe("Error: listen EADDRINUSE: address already in use :::3000", &ctx).unwrap();
        let error_id = ctx.lock().unwrap().current_error_id.clone().unwrap();

        memory.end_session(&ctx);
        assert!(ctx.lock().unwrap().current_error_id.is_none());
        let record = memory.record(&error_id).unwrap().unwrap();
        assert!(!record.resolved);
        assert_eq!(record.context.session_id, "s1");
    }

    #[test]
    fn test_output_window_is_fed() {
        let memory = memory();
        let ctx = Mutex::new(context());
        memory.observe("\x1b[32mhello\x1b[0m", &ctx).unwrap();
        assert_eq!(ctx.lock().unwrap().output_buffer.contents(), "hello");
    }
}
