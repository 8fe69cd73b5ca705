//! Integration tests for ErrorDoctor

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use termsage::doctor::{AiProvider, ErrorDoctor};
use termsage::{AnalyzeRequest, AppliedFix, ApplyFixRequest, ErrorContext, FixSource};

use common::FakeProvider;

const UNKNOWN_ERROR: &str = "Segmentation fault (core dumped) while running ./bin/render";

const STRUCTURED_REPLY: &str = r#"{"explanation": "The renderer dereferenced a freed buffer.",
"fixes": [{"title": "Rebuild native addons", "description": "Stale binaries", "command": "npm rebuild", "confidence": 0.8}]}"#;

fn providers(list: &[Arc<FakeProvider>]) -> Vec<Arc<dyn AiProvider>> {
    list.iter()
        .map(|p| p.clone() as Arc<dyn AiProvider>)
        .collect()
}

#[tokio::test]
async fn test_disabled_doctor_has_no_side_effects() {
    let ai = FakeProvider::replying("cli", FixSource::AiCli, STRUCTURED_REPLY);
    let doctor = ErrorDoctor::with_providers(false, providers(&[ai.clone()]));

    for text in ["Error: Cannot find module 'lodash'", UNKNOWN_ERROR, ""] {
        let result = doctor.analyze(&AnalyzeRequest::new(text)).await;
        assert!(!result.success);
        assert!(result.fixes.is_empty());
        assert!(result.error.as_deref().unwrap().contains("disabled"));
    }
    assert_eq!(ai.calls(), 0);
}

#[tokio::test]
async fn test_scope_toggle_disables_one_session() {
    let doctor = ErrorDoctor::with_providers(true, Vec::new());
    doctor.set_enabled("session-a", false);

    let mut request = AnalyzeRequest::new("Error: Cannot find module 'lodash'");
    request.context.session_id = Some("session-a".to_string());
    assert!(!doctor.analyze(&request).await.success);

    request.context.session_id = Some("session-b".to_string());
    assert!(doctor.analyze(&request).await.success);

    doctor.set_enabled("session-a", true);
    request.context.session_id = Some("session-a".to_string());
    assert!(doctor.analyze(&request).await.success);
}

#[tokio::test]
async fn test_missing_package_quick_fix() {
    let ai = FakeProvider::replying("cli", FixSource::AiCli, STRUCTURED_REPLY);
    let doctor = ErrorDoctor::with_providers(true, providers(&[ai.clone()]));

    let result = doctor
        .analyze(&AnalyzeRequest::new(
            "\x1b[31mError: Cannot find module 'lodash'\x1b[0m\nRequire stack:\n- /app/index.js",
        ))
        .await;
    assert!(result.success);
    assert_eq!(result.source, FixSource::QuickFix);
    assert!(result
        .fixes
        .iter()
        .any(|f| f.command.as_deref() == Some("npm install lodash")));
    assert_eq!(ai.calls(), 0, "quick fixes never escalate");
}

#[tokio::test]
async fn test_port_in_use_quick_fix() {
    let doctor = ErrorDoctor::with_providers(true, Vec::new());
    for text in [
        "port 3000 already in use",
        "Error: listen EADDRINUSE: address already in use :::3000",
    ] {
        let result = doctor.analyze(&AnalyzeRequest::new(text)).await;
        assert_eq!(result.source, FixSource::QuickFix, "{}", text);
        let command = result.fixes.iter().find_map(|f| f.command.clone()).unwrap();
        assert!(command.contains("3000"));
    }
}

#[tokio::test]
async fn test_falls_back_to_api_when_cli_fails() {
    let cli = FakeProvider::failing("cli", FixSource::AiCli);
    let api = FakeProvider::replying("api", FixSource::AiApi, STRUCTURED_REPLY);
    let doctor = ErrorDoctor::with_providers(true, providers(&[cli.clone(), api.clone()]));

    let result = doctor.analyze(&AnalyzeRequest::new(UNKNOWN_ERROR)).await;
    assert!(result.success);
    assert_eq!(result.source, FixSource::AiApi);
    assert_eq!(result.fixes[0].command.as_deref(), Some("npm rebuild"));
    assert_eq!(
        result.explanation.as_deref(),
        Some("The renderer dereferenced a freed buffer.")
    );
    assert_eq!((cli.calls(), api.calls()), (1, 1));
}

#[tokio::test]
async fn test_unavailable_cli_is_skipped() {
    let cli = FakeProvider::unavailable("cli", FixSource::AiCli);
    let api = FakeProvider::replying("api", FixSource::AiApi, STRUCTURED_REPLY);
    let doctor = ErrorDoctor::with_providers(true, providers(&[cli.clone(), api.clone()]));

    let result = doctor.analyze(&AnalyzeRequest::new(UNKNOWN_ERROR)).await;
    assert_eq!(result.source, FixSource::AiApi);
    assert_eq!(cli.calls(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_slow_cli_times_out_and_escalates() {
    use termsage::doctor::CliProvider;

    // `sh -c 'sleep 5' <prompt>`: the prompt lands in $0 and is ignored
    let cli: Arc<dyn AiProvider> = Arc::new(CliProvider::new(
        "sh",
        vec!["-c".to_string(), "sleep 5".to_string()],
        Duration::from_millis(200),
    ));
    let api = FakeProvider::replying("api", FixSource::AiApi, STRUCTURED_REPLY);
    let doctor = ErrorDoctor::with_providers(true, vec![cli, api.clone()]);

    let started = Instant::now();
    let result = doctor.analyze(&AnalyzeRequest::new(UNKNOWN_ERROR)).await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(result.source, FixSource::AiApi);
    assert_eq!(api.calls(), 1);
}

#[tokio::test]
async fn test_malformed_reply_degrades() {
    let cli = FakeProvider::replying(
        "cli",
        FixSource::AiCli,
        "Looks like a native crash. Try deleting node_modules and reinstalling.",
    );
    let doctor = ErrorDoctor::with_providers(true, providers(&[cli]));

    let result = doctor.analyze(&AnalyzeRequest::new(UNKNOWN_ERROR)).await;
    assert!(result.success);
    assert_eq!(result.source, FixSource::AiCli);
    assert_eq!(result.fixes.len(), 1);
    assert!(result.fixes[0].description.contains("reinstalling"));
    assert!(result.fixes[0].command.is_none());
}

#[tokio::test]
async fn test_no_provider_means_manual_intervention() {
    let cli = FakeProvider::failing("cli", FixSource::AiCli);
    let api = FakeProvider::replying("api", FixSource::AiApi, "   ");
    let doctor = ErrorDoctor::with_providers(true, providers(&[cli, api]));

    let result = doctor.analyze(&AnalyzeRequest::new(UNKNOWN_ERROR)).await;
    assert!(!result.success);
    assert_eq!(result.source, FixSource::None);
    assert!(result.explanation.is_some());
    assert!(result.error.unwrap().contains("manual intervention"));
}

#[tokio::test]
async fn test_benign_text_is_not_analyzed() {
    let cli = FakeProvider::replying("cli", FixSource::AiCli, STRUCTURED_REPLY);
    let doctor = ErrorDoctor::with_providers(true, providers(&[cli.clone()]));

    let result = doctor
        .analyze(&AnalyzeRequest::new("added 12 packages, found 0 vulnerabilities"))
        .await;
    assert!(!result.success);
    assert_eq!(cli.calls(), 0);
}

#[tokio::test]
async fn test_context_reaches_analysis() {
    let request = AnalyzeRequest {
        error_text: UNKNOWN_ERROR.to_string(),
        error_type: Some("crash".to_string()),
        context: ErrorContext {
            working_directory: Some("/home/dev/app".to_string()),
            has_package_json: true,
            node_runtime_version: Some("v20.11.0".to_string()),
            last_commands: vec!["npm ci".to_string(), "npm run render".to_string()],
            session_id: None,
        },
        file_path: Some("src/render.c".to_string()),
        line_number: Some(42),
        column_number: Some(7),
        stack_trace: Some("x".repeat(2000)),
    };

    let prompt = termsage::doctor::build_prompt(&request);
    assert!(prompt.contains("/home/dev/app"));
    assert!(prompt.contains("src/render.c:42:7"));
    assert!(prompt.contains("v20.11.0"));
    assert!(prompt.contains("npm run render"));
    assert!(!prompt.contains(&"x".repeat(termsage::doctor::MAX_STACK_TRACE_CHARS + 1)));
}

#[test]
fn test_apply_fix_only_validates() {
    let doctor = ErrorDoctor::with_providers(true, Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("new.js");

    let applied = doctor
        .apply_fix(&ApplyFixRequest {
            kind: "edit_file".to_string(),
            file_path: Some(target.display().to_string()),
            content: Some("module.exports = {}".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(matches!(applied, AppliedFix::EditFile { .. }));
    assert!(!target.exists(), "apply_fix must not write files");

    let applied = doctor
        .apply_fix(&ApplyFixRequest {
            kind: "execute_command".to_string(),
            command: Some(format!("touch {}", target.display())),
            ..Default::default()
        })
        .unwrap();
    assert!(matches!(applied, AppliedFix::ExecuteCommand { .. }));
    assert!(!target.exists(), "apply_fix must not run commands");

    let rejected = doctor.apply_fix(&ApplyFixRequest {
        kind: "restart_service".to_string(),
        ..Default::default()
    });
    assert!(rejected.unwrap_err().to_string().contains("manual intervention"));
}

#[tokio::test]
async fn test_error_next_to_chatter_is_analyzed() {
    let doctor = ErrorDoctor::with_providers(true, Vec::new());
    let result = doctor
        .analyze(&AnalyzeRequest::new(
            "Error: Cannot find module 'chalk'\nfound 0 vulnerabilities",
        ))
        .await;
    assert!(result.success);
    assert_eq!(result.fixes[0].command.as_deref(), Some("npm install chalk"));
}
