//! Error doctor
//!
//! Tiered analysis of a single error: deterministic quick fixes first, then
//! AI providers in order (local CLI, hosted API), then a manual-intervention
//! result. The doctor only proposes remedies; [`ErrorDoctor::apply_fix`]
//! validates one and hands it back without running or writing anything.

mod parse;
mod prompt;
mod provider;
mod quick_fix;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::DoctorSettings;
use crate::domain::{AnalysisResult, AnalyzeRequest, AppliedFix, ApplyFixRequest, FixSource};
use crate::memory::{strip_ansi, strip_noise};

pub use parse::parse_response;
pub use prompt::{build_prompt, MAX_STACK_TRACE_CHARS, PROMPT_COMMAND_COUNT};
pub use provider::{default_providers, AiProvider, ApiProvider, CliProvider};
pub use quick_fix::{quick_fix, QuickFix};

#[derive(Debug, thiserror::Error)]
pub enum DoctorError {
    #[error("Error doctor is disabled: {0}")]
    Disabled(String),

    #[error("AI provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("AI provider timed out after {0}s")]
    Timeout(u64),

    #[error("AI provider failed: {0}")]
    Provider(String),

    #[error("Invalid fix: {0}")]
    InvalidFixShape(String),
}

/// Toggle scope used when a request names no session
pub const DEFAULT_SCOPE: &str = "default";

pub struct ErrorDoctor {
    /// Config switch combined with the environment flag, read at construction
    globally_enabled: bool,
    providers: Vec<Arc<dyn AiProvider>>,
    toggles: Mutex<HashMap<String, bool>>,
}

impl ErrorDoctor {
    /// Doctor with the providers configured in `settings`
    pub fn new(settings: &DoctorSettings) -> Self {
        Self::with_providers(settings.globally_enabled(), default_providers(settings))
    }

    pub fn with_providers(globally_enabled: bool, providers: Vec<Arc<dyn AiProvider>>) -> Self {
        if !globally_enabled {
            info!("[termsage:doctor] Error doctor disabled globally");
        }
        Self {
            globally_enabled,
            providers,
            toggles: Mutex::new(HashMap::new()),
        }
    }

    /// Switch analysis on or off for one session or user
    pub fn set_enabled(&self, scope: &str, enabled: bool) {
        let mut toggles = self.toggles.lock().unwrap_or_else(|e| e.into_inner());
        toggles.insert(scope.to_string(), enabled);
        debug!("[termsage:doctor] Scope {} enabled={}", scope, enabled);
    }

    /// Both the global flag and the scope's toggle (default on) must be set
    pub fn is_enabled(&self, scope: &str) -> bool {
        self.globally_enabled && self.scope_enabled(scope)
    }

    fn scope_enabled(&self, scope: &str) -> bool {
        let toggles = self.toggles.lock().unwrap_or_else(|e| e.into_inner());
        toggles.get(scope).copied().unwrap_or(true)
    }

    fn guard(&self, scope: &str) -> Result<(), DoctorError> {
        if !self.globally_enabled {
            return Err(DoctorError::Disabled(
                "disabled by configuration or environment".to_string(),
            ));
        }
        if !self.scope_enabled(scope) {
            return Err(DoctorError::Disabled(format!("disabled for {}", scope)));
        }
        Ok(())
    }

    /// Analyze one error. Never fails; problems surface in the result.
    pub async fn analyze(&self, request: &AnalyzeRequest) -> AnalysisResult {
        let scope = request.context.session_id.as_deref().unwrap_or(DEFAULT_SCOPE);
        if let Err(e) = self.guard(scope) {
            return AnalysisResult::disabled(e.to_string());
        }

        let text = strip_noise(&strip_ansi(&request.error_text));
        let text = text.trim();
        if text.is_empty() {
            return AnalysisResult::no_fix("no error found in the supplied text");
        }

        if let Some(found) = quick_fix(text) {
            info!("[termsage:doctor] Quick fix '{}' matched", found.rule);
            return AnalysisResult::resolved(FixSource::QuickFix, found.fixes, Some(found.explanation));
        }

        let prompt = build_prompt(request);
        for provider in &self.providers {
            if !provider.is_available() {
                debug!("[termsage:doctor] Skipping unavailable provider {}", provider.name());
                continue;
            }

            match provider.complete(&prompt).await {
                Ok(raw) => match parse_response(&raw) {
                    Some((fixes, explanation)) => {
                        info!(
                            "[termsage:doctor] {} proposed {} fix(es)",
                            provider.name(),
                            fixes.len()
                        );
                        return AnalysisResult::resolved(provider.source(), fixes, explanation);
                    }
                    None => warn!("[termsage:doctor] {} returned an empty reply", provider.name()),
                },
                Err(e) => warn!("[termsage:doctor] {} failed: {}", provider.name(), e),
            }
        }

        AnalysisResult::manual_intervention(
            "No quick fix matched and no AI provider could analyze this error.",
        )
    }

    /// Validate a remedy. Nothing is executed or written.
    pub fn apply_fix(&self, request: &ApplyFixRequest) -> Result<AppliedFix, DoctorError> {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match request.kind.as_str() {
            "execute_command" => {
                let command = non_empty(&request.command).ok_or_else(|| {
                    DoctorError::InvalidFixShape("execute_command requires a command".to_string())
                })?;
                Ok(AppliedFix::ExecuteCommand { command })
            }
            "edit_file" => {
                let file_path = non_empty(&request.file_path).ok_or_else(|| {
                    DoctorError::InvalidFixShape("edit_file requires a filePath".to_string())
                })?;
                let content = request.content.clone().ok_or_else(|| {
                    DoctorError::InvalidFixShape("edit_file requires content".to_string())
                })?;
                Ok(AppliedFix::EditFile { file_path, content })
            }
            other => Err(DoctorError::InvalidFixShape(format!(
                "unsupported fix type '{}', manual intervention required",
                other
            ))),
        }
    }
}
