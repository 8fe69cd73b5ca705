//! AI providers for the escalation tier

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use super::DoctorError;
use crate::config::DoctorSettings;
use crate::domain::FixSource;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest stderr excerpt carried in an error
const MAX_STDERR_CHARS: usize = 300;

/// A source of free-text analysis for a prompt
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Tier reported in results produced by this provider
    fn source(&self) -> FixSource;

    /// Cheap check performed before any process or request is started
    fn is_available(&self) -> bool;

    /// Run the prompt and return the raw reply
    async fn complete(&self, prompt: &str) -> Result<String, DoctorError>;
}

/// Local assistant CLI, invoked as `<binary> <args...> <prompt>`
pub struct CliProvider {
    binary: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CliProvider {
    pub fn new(binary: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            args,
            timeout,
        }
    }

    pub fn from_settings(settings: &DoctorSettings) -> Self {
        Self::new(
            settings.cli_binary.clone(),
            settings.cli_args.clone(),
            Duration::from_secs(settings.cli_timeout_secs),
        )
    }
}

#[async_trait]
impl AiProvider for CliProvider {
    fn name(&self) -> &str {
        &self.binary
    }

    fn source(&self) -> FixSource {
        FixSource::AiCli
    }

    fn is_available(&self) -> bool {
        if self.binary.contains(std::path::MAIN_SEPARATOR) {
            return std::path::Path::new(&self.binary).is_file();
        }
        std::process::Command::new("which")
            .arg(&self.binary)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn complete(&self, prompt: &str) -> Result<String, DoctorError> {
        let child = Command::new(&self.binary)
            .args(&self.args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must not leave the process behind
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DoctorError::ProviderUnavailable(format!("failed to spawn {}: {}", self.binary, e))
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DoctorError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| DoctorError::Provider(format!("{} failed: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DoctorError::Provider(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim().chars().take(MAX_STDERR_CHARS).collect::<String>()
            )));
        }

        debug!(
            "[termsage:doctor] {} replied with {} bytes",
            self.binary,
            output.stdout.len()
        );
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Hosted messages API
pub struct ApiProvider {
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    timeout: Duration,
    agent: ureq::Agent,
}

impl ApiProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        // The overall deadline also ends the blocking request once the
        // caller has stopped waiting for it
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(timeout)
            .timeout(timeout)
            .build();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens,
            timeout,
            agent,
        }
    }

    /// Configured only when the key variable is set
    pub fn from_settings(settings: &DoctorSettings) -> Option<Self> {
        let key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        Some(Self::new(
            settings.api_url.clone(),
            settings.api_model.clone(),
            key,
            settings.max_tokens,
            Duration::from_secs(settings.api_timeout_secs),
        ))
    }

    fn request_blocking(
        agent: &ureq::Agent,
        url: &str,
        api_key: &str,
        body: serde_json::Value,
    ) -> Result<String, DoctorError> {
        let response = agent
            .post(url)
            .set("x-api-key", api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .set("content-type", "application/json")
            .send_json(body);

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(DoctorError::Provider(format!(
                    "API returned {}: {}",
                    code,
                    body.chars().take(MAX_STDERR_CHARS).collect::<String>()
                )));
            }
            Err(e) => return Err(DoctorError::ProviderUnavailable(e.to_string())),
        };

        let value: serde_json::Value = response
            .into_json()
            .map_err(|e| DoctorError::Provider(format!("unreadable API response: {}", e)))?;

        let text: String = value["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok(text)
    }
}

#[async_trait]
impl AiProvider for ApiProvider {
    fn name(&self) -> &str {
        "messages-api"
    }

    fn source(&self) -> FixSource {
        FixSource::AiApi
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(&self, prompt: &str) -> Result<String, DoctorError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let agent = self.agent.clone();
        let api_key = self.api_key.clone();

        let request = tokio::task::spawn_blocking(move || {
            Self::request_blocking(&agent, &url, &api_key, body)
        });

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| DoctorError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| DoctorError::Provider(format!("API task failed: {}", e)))?
    }
}

/// Providers in escalation order: local CLI, then hosted API if configured
pub fn default_providers(settings: &DoctorSettings) -> Vec<std::sync::Arc<dyn AiProvider>> {
    let mut providers: Vec<std::sync::Arc<dyn AiProvider>> =
        vec![std::sync::Arc::new(CliProvider::from_settings(settings))];
    if let Some(api) = ApiProvider::from_settings(settings) {
        providers.push(std::sync::Arc::new(api));
    }
    providers
}
