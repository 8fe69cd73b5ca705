//! AI response parsing
//!
//! Structured JSON is preferred. Anything else degrades to one suggestion
//! built from the raw text, so a chatty or truncated reply still helps.

use serde::Deserialize;

use crate::domain::Fix;

/// Longest raw text kept in a degraded suggestion
const MAX_FALLBACK_CHARS: usize = 500;

const FALLBACK_CONFIDENCE: f64 = 0.4;
const DEFAULT_FIX_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize)]
struct AiResponse {
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    fixes: Vec<AiFix>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AiFix {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "requires_file_edit")]
    requires_file_edit: bool,
}

impl AiFix {
    fn into_fix(self) -> Option<Fix> {
        let command = self.command.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        let description = self.description.unwrap_or_default().trim().to_string();
        if command.is_none() && description.is_empty() {
            return None;
        }

        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Suggested fix".to_string());
        let confidence = self
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_FIX_CONFIDENCE)
            .clamp(0.0, 1.0);

        Some(Fix {
            title,
            description,
            command,
            confidence,
            requires_file_edit: self.requires_file_edit,
        })
    }
}

/// Parsed fixes and explanation; `None` only for an empty reply
pub fn parse_response(raw: &str) -> Option<(Vec<Fix>, Option<String>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(parsed) = parse_structured(raw) {
        return Some(parsed);
    }

    let text: String = raw.chars().take(MAX_FALLBACK_CHARS).collect();
    let fix = Fix::advice("AI suggestion", text, FALLBACK_CONFIDENCE);
    Some((vec![fix], None))
}

fn parse_structured(raw: &str) -> Option<(Vec<Fix>, Option<String>)> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }

    let response: AiResponse = serde_json::from_str(&raw[start..=end]).ok()?;
    let fixes: Vec<Fix> = response.fixes.into_iter().filter_map(AiFix::into_fix).collect();
    if fixes.is_empty() {
        return None;
    }

    let explanation = response
        .explanation
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    Some((fixes, explanation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_response_inside_prose() {
        let raw = r#"Sure! Here you go:
```json
{"explanation": "chalk is missing", "fixes": [{"title": "Install chalk", "description": "Add the dependency", "command": "npm install chalk", "confidence": 0.92}]}
```"#;
        let (fixes, explanation) = parse_response(raw).unwrap();
        assert_eq!(explanation.as_deref(), Some("chalk is missing"));
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].command.as_deref(), Some("npm install chalk"));
        assert!((fixes[0].confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_is_clamped_and_defaulted() {
        let raw = r#"{"fixes": [{"description": "a", "confidence": 7}, {"description": "b"}]}"#;
        let (fixes, _) = parse_response(raw).unwrap();
        assert_eq!(fixes[0].confidence, 1.0);
        assert_eq!(fixes[1].confidence, DEFAULT_FIX_CONFIDENCE);
        assert_eq!(fixes[1].title, "Suggested fix");
    }

    #[test]
    fn test_malformed_degrades_to_single_suggestion() {
        let raw = format!("{{not json at all {}", "y".repeat(1000));
        let (fixes, explanation) = parse_response(&raw).unwrap();
        assert_eq!(fixes.len(), 1);
        assert!(explanation.is_none());
        assert_eq!(fixes[0].description.chars().count(), MAX_FALLBACK_CHARS);
        assert_eq!(fixes[0].confidence, FALLBACK_CONFIDENCE);
    }

    #[test]
    fn test_unbalanced_braces_do_not_panic() {
        assert!(parse_response("} oops {").is_some());
        assert!(parse_response("   ").is_none());
    }
}
