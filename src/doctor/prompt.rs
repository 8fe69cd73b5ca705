//! Prompt sent to AI providers

use crate::domain::AnalyzeRequest;

/// Stack traces are cut to this many characters
pub const MAX_STACK_TRACE_CHARS: usize = 500;

/// Commands included from the session history
pub const PROMPT_COMMAND_COUNT: usize = 3;

const RESPONSE_FORMAT: &str = r#"Respond with JSON only, in this shape:
{
  "explanation": "one or two sentences on the root cause",
  "fixes": [
    {
      "title": "short imperative title",
      "description": "what the fix does",
      "command": "shell command to run, omit if the fix is a code change",
      "confidence": 0.0,
      "requiresFileEdit": false
    }
  ]
}"#;

pub fn build_prompt(request: &AnalyzeRequest) -> String {
    let mut prompt = String::from(
        "You are diagnosing an error from a developer's terminal. Suggest concrete fixes.\n\n",
    );

    prompt.push_str("## Error\n");
    if let Some(kind) = request.error_type.as_deref().filter(|k| !k.is_empty()) {
        prompt.push_str(&format!("Type: {}\n", kind));
    }
    prompt.push_str("```\n");
    prompt.push_str(request.error_text.trim());
    prompt.push_str("\n```\n\n");

    prompt.push_str("## Context\n");
    let ctx = &request.context;
    if let Some(cwd) = ctx.working_directory.as_deref() {
        prompt.push_str(&format!("Working directory: {}\n", cwd));
    }
    if let Some(file) = request.file_path.as_deref() {
        let mut location = file.to_string();
        if let Some(line) = request.line_number {
            location.push_str(&format!(":{}", line));
            if let Some(column) = request.column_number {
                location.push_str(&format!(":{}", column));
            }
        }
        prompt.push_str(&format!("Location: {}\n", location));
    }
    prompt.push_str(&format!(
        "package.json present: {}\n",
        if ctx.has_package_json { "yes" } else { "no" }
    ));
    if let Some(version) = ctx.node_runtime_version.as_deref() {
        prompt.push_str(&format!("Node.js version: {}\n", version));
    }

    let skip = ctx.last_commands.len().saturating_sub(PROMPT_COMMAND_COUNT);
    let recent: Vec<&str> = ctx.last_commands.iter().skip(skip).map(String::as_str).collect();
    if !recent.is_empty() {
        prompt.push_str("Recent commands:\n");
        for command in recent {
            prompt.push_str(&format!("  $ {}\n", command));
        }
    }

    if let Some(trace) = request.stack_trace.as_deref().filter(|t| !t.trim().is_empty()) {
        let trace: String = trace.chars().take(MAX_STACK_TRACE_CHARS).collect();
        prompt.push_str("\n## Stack trace\n```\n");
        prompt.push_str(&trace);
        prompt.push_str("\n```\n");
    }

    prompt.push('\n');
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}
