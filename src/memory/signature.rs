//! Error signatures: terminal text with volatile tokens normalized away.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::skip_escape_sequence;

/// Longest signature kept; error lines beyond this are truncated
const MAX_SIGNATURE_CHARS: usize = 200;

/// Score given to a containment match
const CONTAINMENT_SCORE: f64 = 0.9;

/// Shortest signature allowed to match by containment
const MIN_CONTAINMENT_CHARS: usize = 12;

/// Replacements applied in order; timestamps go first so their digits
/// are not split up by the number rule.
static NORMALIZERS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let table: [(&str, &'static str); 4] = [
        (
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2})?(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?|\b\d{1,2}:\d{2}:\d{2}(?:\.\d+)?\b",
            "<ts>",
        ),
        // Rooted paths only; `@scope/pkg` and `src/app.ts` keep their names
        (
            r#"(^|[\s'"`(=:,])(?:[A-Za-z]:|~|\.{1,2})?(?:[/\\][\w.@+\-]+)+[/\\]?"#,
            "${1}<path>",
        ),
        (r"\b0x[0-9a-fA-F]+\b|\b[0-9a-f]{8,}\b", "<hex>"),
        (r"\b\d+\b", "<n>"),
    ];

    table
        .into_iter()
        .filter_map(|(pattern, placeholder)| match Regex::new(pattern) {
            Ok(regex) => Some((regex, placeholder)),
            Err(e) => {
                tracing::error!("[termsage:memory] Invalid normalizer {}: {}", placeholder, e);
                None
            }
        })
        .collect()
});

/// Strip ANSI escape sequences and stray control characters
pub fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            skip_escape_sequence(&mut chars);
        } else if c == '\n' || c == '\t' || !c.is_control() {
            // CR is dropped too, so CRLF collapses to LF
            result.push(c);
        }
    }

    result
}

/// Normalize an error line into a signature.
///
/// Paths, timestamps, hex ids and numbers are replaced with placeholders so
/// the same failure in different directories or runs maps to one signature.
pub fn normalize(line: &str) -> String {
    let mut s = strip_ansi(line);
    for (regex, placeholder) in NORMALIZERS.iter() {
        s = regex.replace_all(&s, *placeholder).into_owned();
    }
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_SIGNATURE_CHARS)
        .collect()
}

/// Quoted tokens ('x', "x", `x`) name the thing that failed
fn quoted_tokens(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find(['\'', '"', '`']) {
        let quote = rest[start..].chars().next().unwrap_or('\'');
        let after = &rest[start + 1..];
        match after.find(quote) {
            Some(end) => {
                tokens.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    tokens
}

/// Similarity of two signatures in `[0, 1]`.
///
/// Exact equality scores 1.0. Signatures naming different quoted subjects
/// (`'chalk'` vs `'lodash'`) score 0. Otherwise containment either way
/// scores [`CONTAINMENT_SCORE`] and anything else falls back to normalized
/// Levenshtein similarity.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if quoted_tokens(a) != quoted_tokens(b) {
        return 0.0;
    }

    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if shorter.chars().count() >= MIN_CONTAINMENT_CHARS && longer.contains(shorter) {
        return CONTAINMENT_SCORE;
    }

    strsim::normalized_levenshtein(a, b)
}
