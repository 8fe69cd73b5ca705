//! SQLite pattern store
//!
//! Manages `~/.termsage/patterns.db`, creating the schema on first open. Every
//! read-modify-write runs in a transaction on the single shared connection,
//! so concurrent sessions never lose or double-count an update.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::MemoryError;
use crate::domain::{ErrorCategory, ErrorRecord, Pattern, Solution};

/// Upper bound for pattern confidence
pub const MAX_CONFIDENCE: f64 = 0.95;

/// Matches needed to reach ~63% of [`MAX_CONFIDENCE`]
const CONFIDENCE_SCALE: f64 = 5.0;

/// Confidence gained by a solution each time the same fix is seen again
const SOLUTION_REPEAT_BOOST: f64 = 0.1;

/// Bounded, non-decreasing confidence curve over the match count
pub fn confidence_for(match_count: u64) -> f64 {
    let c = MAX_CONFIDENCE * (1.0 - (-(match_count as f64) / CONFIDENCE_SCALE).exp());
    c.clamp(0.0, MAX_CONFIDENCE)
}

/// Store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub patterns: u64,
    pub solutions: u64,
    pub open_errors: u64,
    pub resolved_errors: u64,
}

/// Database wrapper shared by every session
#[derive(Clone)]
pub struct PatternDb {
    conn: Arc<Mutex<Connection>>,
}

impl PatternDb {
    /// Open or create the pattern database at `path`
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Throwaway database, used when persistence is not wanted
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MemoryError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<(), MemoryError> {
        self.conn().execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Pattern with exactly this signature and category
    pub fn find_exact(
        &self,
        signature: &str,
        category: ErrorCategory,
    ) -> Result<Option<i64>, MemoryError> {
        let conn = self.conn();
        let id = conn
            .query_row(
                "SELECT id FROM patterns WHERE signature = ?1 AND category = ?2",
                params![signature, category.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// All signatures stored for a category
    pub fn signatures(&self, category: ErrorCategory) -> Result<Vec<(i64, String)>, MemoryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, signature FROM patterns WHERE category = ?1")?;
        let rows = stmt
            .query_map(params![category.as_str()], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert a pattern with `match_count = 0`, or return the existing id
    pub fn insert_pattern(
        &self,
        signature: &str,
        category: ErrorCategory,
    ) -> Result<i64, MemoryError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT OR IGNORE INTO patterns
               (signature, category, match_count, confidence, created_at, updated_at)
               VALUES (?1, ?2, 0, 0.0, ?3, ?3)"#,
            params![signature, category.as_str(), now],
        )?;
        let id = tx.query_row(
            "SELECT id FROM patterns WHERE signature = ?1",
            params![signature],
            |r| r.get(0),
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Count a match and recompute confidence; returns `(match_count, confidence)`
    pub fn record_match(&self, pattern_id: i64) -> Result<(u64, f64), MemoryError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE patterns SET match_count = match_count + 1, updated_at = ?2 WHERE id = ?1",
            params![pattern_id, now],
        )?;
        let count: i64 = tx.query_row(
            "SELECT match_count FROM patterns WHERE id = ?1",
            params![pattern_id],
            |r| r.get(0),
        )?;
        let count = count.max(0) as u64;
        // MAX keeps confidence monotonic even if the curve ever changes
        tx.execute(
            "UPDATE patterns SET confidence = MAX(confidence, ?2) WHERE id = ?1",
            params![pattern_id, confidence_for(count)],
        )?;
        let confidence: f64 = tx.query_row(
            "SELECT confidence FROM patterns WHERE id = ?1",
            params![pattern_id],
            |r| r.get(0),
        )?;

        tx.commit()?;
        Ok((count, confidence))
    }

    /// Load a pattern with its solutions, best first
    pub fn load_pattern(&self, pattern_id: i64) -> Result<Option<Pattern>, MemoryError> {
        let conn = self.conn();
        load_pattern(&conn, pattern_id)
    }

    /// Most frequently matched patterns first
    pub fn list_patterns(&self, limit: usize) -> Result<Vec<Pattern>, MemoryError> {
        let conn = self.conn();
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM patterns ORDER BY match_count DESC, confidence DESC, id ASC LIMIT ?1",
            )?;
            stmt.query_map(params![limit as i64], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut patterns = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pattern) = load_pattern(&conn, id)? {
                patterns.push(pattern);
            }
        }
        Ok(patterns)
    }

    pub fn insert_record(&self, record: &ErrorRecord, pattern_id: i64) -> Result<(), MemoryError> {
        let context = serde_json::to_string(&record.context)?;
        let conn = self.conn();
        conn.execute(
            r#"INSERT INTO error_records
               (id, pattern_id, raw_text, category, signature, context_json, timestamp, resolved)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                record.id,
                pattern_id,
                record.raw_text,
                record.category.as_str(),
                record.signature,
                context,
                record.timestamp.timestamp_millis(),
                record.resolved as i32,
            ],
        )?;
        Ok(())
    }

    pub fn load_record(&self, error_id: &str) -> Result<Option<ErrorRecord>, MemoryError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                r#"SELECT id, raw_text, category, signature, context_json, timestamp, resolved
                   FROM error_records WHERE id = ?1"#,
                params![error_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, i64>(5)?,
                        r.get::<_, i32>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, raw_text, category, signature, context, timestamp, resolved)) = row else {
            return Ok(None);
        };
        Ok(Some(ErrorRecord {
            id,
            raw_text,
            category: ErrorCategory::parse(&category).unwrap_or(ErrorCategory::GenericFailure),
            signature,
            context: serde_json::from_str(&context)?,
            timestamp: millis_to_datetime(timestamp),
            resolved: resolved != 0,
        }))
    }

    /// Attach a fix to an open error and resolve it.
    ///
    /// Returns `None` when the error is unknown or already resolved, so only
    /// the first capture for an error ever lands.
    pub fn resolve_with_solution(
        &self,
        error_id: &str,
        solution: &Solution,
    ) -> Result<Option<i64>, MemoryError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let pattern_id: Option<Option<i64>> = tx
            .query_row(
                "SELECT pattern_id FROM error_records WHERE id = ?1 AND resolved = 0",
                params![error_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(Some(pattern_id)) = pattern_id else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE error_records SET resolved = 1 WHERE id = ?1",
            params![error_id],
        )?;
        tx.execute(
            r#"INSERT INTO solutions (pattern_id, fix_text, confidence, captured_at, session_id)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(pattern_id, fix_text) DO UPDATE SET
                   confidence = MIN(?6, solutions.confidence + ?7),
                   captured_at = excluded.captured_at,
                   session_id = excluded.session_id"#,
            params![
                pattern_id,
                solution.fix_text,
                solution.confidence,
                solution.captured_at.timestamp_millis(),
                solution.session_id,
                MAX_CONFIDENCE,
                SOLUTION_REPEAT_BOOST,
            ],
        )?;

        tx.commit()?;
        Ok(Some(pattern_id))
    }

    pub fn stats(&self) -> Result<MemoryStats, MemoryError> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<u64, MemoryError> {
            let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
            Ok(n.max(0) as u64)
        };

        Ok(MemoryStats {
            patterns: count("SELECT COUNT(*) FROM patterns")?,
            solutions: count("SELECT COUNT(*) FROM solutions")?,
            open_errors: count("SELECT COUNT(*) FROM error_records WHERE resolved = 0")?,
            resolved_errors: count("SELECT COUNT(*) FROM error_records WHERE resolved = 1")?,
        })
    }
}

fn load_pattern(conn: &Connection, pattern_id: i64) -> Result<Option<Pattern>, MemoryError> {
    let row = conn
        .query_row(
            "SELECT id, signature, category, match_count, confidence FROM patterns WHERE id = ?1",
            params![pattern_id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, f64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((id, signature, category, match_count, confidence)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        r#"SELECT fix_text, confidence, captured_at, session_id FROM solutions
           WHERE pattern_id = ?1 ORDER BY confidence DESC, captured_at DESC"#,
    )?;
    let solutions = stmt
        .query_map(params![id], |r| {
            Ok(Solution {
                fix_text: r.get(0)?,
                confidence: r.get(1)?,
                captured_at: millis_to_datetime(r.get(2)?),
                session_id: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Pattern {
        id,
        signature,
        category: ErrorCategory::parse(&category).unwrap_or(ErrorCategory::GenericFailure),
        solutions,
        match_count: match_count.max(0) as u64,
        confidence,
    }))
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

const SCHEMA_SQL: &str = r#"
-- Learned error signatures
CREATE TABLE IF NOT EXISTS patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signature TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL,
    match_count INTEGER NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0.0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_patterns_category ON patterns(category);

-- Fixes observed after a pattern's errors
CREATE TABLE IF NOT EXISTS solutions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern_id INTEGER NOT NULL REFERENCES patterns(id) ON DELETE CASCADE,
    fix_text TEXT NOT NULL,
    confidence REAL NOT NULL,
    captured_at INTEGER NOT NULL,
    session_id TEXT NOT NULL,
    UNIQUE(pattern_id, fix_text)
);

-- Individual sightings awaiting a fix
CREATE TABLE IF NOT EXISTS error_records (
    id TEXT PRIMARY KEY,
    pattern_id INTEGER REFERENCES patterns(id) ON DELETE SET NULL,
    raw_text TEXT NOT NULL,
    category TEXT NOT NULL,
    signature TEXT NOT NULL,
    context_json TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_error_records_open ON error_records(resolved);
"#;
