//! Request and response types of the error doctor.

use serde::{Deserialize, Serialize};

/// Which tier produced an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixSource {
    QuickFix,
    AiCli,
    AiApi,
    None,
}

/// A single suggested remedy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub requires_file_edit: bool,
}

impl Fix {
    pub fn command(
        title: impl Into<String>,
        description: impl Into<String>,
        command: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            command: Some(command.into()),
            confidence,
            requires_file_edit: false,
        }
    }

    pub fn advice(title: impl Into<String>, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            command: None,
            confidence,
            requires_file_edit: false,
        }
    }

    pub fn with_file_edit(mut self) -> Self {
        self.requires_file_edit = true;
        self
    }
}

/// Outcome of `ErrorDoctor::analyze`; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub source: FixSource,
    pub confidence: f64,
    pub fixes: Vec<Fix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            source: FixSource::None,
            confidence: 0.0,
            fixes: Vec::new(),
            explanation: None,
            error: Some(reason.into()),
        }
    }

    /// Nothing to analyze
    pub fn no_fix(reason: impl Into<String>) -> Self {
        Self::disabled(reason)
    }

    pub fn manual_intervention(explanation: impl Into<String>) -> Self {
        Self {
            success: false,
            source: FixSource::None,
            confidence: 0.0,
            fixes: Vec::new(),
            explanation: Some(explanation.into()),
            error: Some("manual intervention required".to_string()),
        }
    }

    pub fn resolved(source: FixSource, fixes: Vec<Fix>, explanation: Option<String>) -> Self {
        let confidence = fixes.iter().map(|f| f.confidence).fold(0.0, f64::max);
        Self {
            success: true,
            source,
            confidence,
            fixes,
            explanation,
            error: None,
        }
    }
}

/// Environment facts about where the error happened
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub has_package_json: bool,
    #[serde(default)]
    pub node_runtime_version: Option<String>,
    #[serde(default)]
    pub last_commands: Vec<String>,
    /// Session or user the dynamic enable toggle is looked up for
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Input of `ErrorDoctor::analyze`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub error_text: String,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub context: ErrorContext,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub column_number: Option<u32>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

impl AnalyzeRequest {
    pub fn new(error_text: impl Into<String>) -> Self {
        Self {
            error_text: error_text.into(),
            ..Default::default()
        }
    }
}

/// Raw remedy handed to `ErrorDoctor::apply_fix`, validated into [`AppliedFix`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyFixRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A validated remedy; the caller decides whether to act on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AppliedFix {
    ExecuteCommand {
        command: String,
    },
    #[serde(rename_all = "camelCase")]
    EditFile { file_path: String, content: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_takes_best_confidence() {
        let result = AnalysisResult::resolved(
            FixSource::QuickFix,
            vec![
                Fix::advice("a", "a", 0.4),
                Fix::command("b", "b", "true", 0.9),
            ],
            None,
        );
        assert!(result.success);
        assert!((result.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fix_source_wire_names() {
        assert_eq!(serde_json::to_value(FixSource::QuickFix).unwrap(), "quick-fix");
        assert_eq!(serde_json::to_value(FixSource::AiCli).unwrap(), "ai-cli");
        assert_eq!(serde_json::to_value(FixSource::AiApi).unwrap(), "ai-api");
    }

    #[test]
    fn test_apply_request_parses_camel_case() {
        let req: ApplyFixRequest = serde_json::from_str(
            r#"{"type":"edit_file","filePath":"src/a.js","content":"x"}"#,
        )
        .unwrap();
        assert_eq!(req.kind, "edit_file");
        assert_eq!(req.file_path.as_deref(), Some("src/a.js"));
    }
}
