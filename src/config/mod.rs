//! Configuration loading and management

mod io;

pub use io::write_config_file;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable that can switch the error doctor off globally
pub const DOCTOR_ENV_FLAG: &str = "TERMSAGE_ERROR_DOCTOR";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Terminal session settings
    #[serde(default)]
    pub terminal: TerminalSettings,

    /// Error pattern memory settings
    #[serde(default)]
    pub memory: MemorySettings,

    /// Error doctor settings
    #[serde(default)]
    pub doctor: DoctorSettings,

    /// Local control API settings
    #[serde(default)]
    pub server: ServerSettings,
}

/// How a session's process backend is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStrategy {
    /// Native PTY, falling back to the simulator when PTYs are unavailable
    #[default]
    Auto,
    /// Native PTY only
    Native,
    /// Always use the simulator
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSettings {
    /// Shell to launch; falls back to $SHELL, then /bin/bash
    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub backend: BackendStrategy,

    /// Maximum number of live sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Sessions idle for longer than this are reaped
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_cols")]
    pub default_cols: u16,

    #[serde(default = "default_rows")]
    pub default_rows: u16,

    /// Size of the per-session output window fed to the error memory
    #[serde(default = "default_output_buffer_chars")]
    pub output_buffer_chars: usize,

    /// Commands remembered per session
    #[serde(default = "default_command_history")]
    pub command_history: usize,

    /// Attempts at opening a PTY before giving up
    #[serde(default = "default_spawn_retries")]
    pub spawn_retries: u32,
}

fn default_max_sessions() -> usize {
    10
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

fn default_output_buffer_chars() -> usize {
    crate::domain::DEFAULT_OUTPUT_WINDOW
}

fn default_command_history() -> usize {
    crate::domain::DEFAULT_COMMAND_HISTORY
}

fn default_spawn_retries() -> u32 {
    3
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: None,
            backend: BackendStrategy::default(),
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            default_cols: default_cols(),
            default_rows: default_rows(),
            output_buffer_chars: default_output_buffer_chars(),
            command_history: default_command_history(),
            spawn_retries: default_spawn_retries(),
        }
    }
}

impl TerminalSettings {
    /// Shell used for native sessions
    pub fn resolve_shell(&self) -> String {
        if let Some(shell) = self.shell.as_deref().filter(|s| !s.trim().is_empty()) {
            return shell.to_string();
        }
        if cfg!(target_os = "windows") {
            "cmd.exe".to_string()
        } else {
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Disable to run terminals without pattern learning
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SQLite database; defaults to ~/.termsage/patterns.db
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Substantive output chunks inspected for a fix after an error
    #[serde(default = "default_fix_capture_window")]
    pub fix_capture_window: usize,

    /// Shortest output accepted as a fix
    #[serde(default = "default_min_fix_len")]
    pub min_fix_len: usize,

    /// Normalized Levenshtein similarity needed for a fuzzy signature match
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_fix_capture_window() -> usize {
    8
}

fn default_min_fix_len() -> usize {
    10
}

fn default_similarity_threshold() -> f64 {
    0.85
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: None,
            fix_capture_window: default_fix_capture_window(),
            min_fix_len: default_min_fix_len(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl MemorySettings {
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| Config::global_config_dir().join("patterns.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorSettings {
    /// Global switch; `TERMSAGE_ERROR_DOCTOR=0` overrides it at runtime
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Local assistant CLI tried first for AI analysis
    #[serde(default = "default_cli_binary")]
    pub cli_binary: String,

    #[serde(default = "default_cli_args")]
    pub cli_args: Vec<String>,

    #[serde(default = "default_ai_timeout_secs")]
    pub cli_timeout_secs: u64,

    /// Hosted messages API used when the CLI is unavailable
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_api_model")]
    pub api_model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_ai_timeout_secs")]
    pub api_timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_cli_binary() -> String {
    "claude".to_string()
}

fn default_cli_args() -> Vec<String> {
    vec!["-p".to_string()]
}

fn default_ai_timeout_secs() -> u64 {
    30
}

fn default_api_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for DoctorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cli_binary: default_cli_binary(),
            cli_args: default_cli_args(),
            cli_timeout_secs: default_ai_timeout_secs(),
            api_url: default_api_url(),
            api_model: default_api_model(),
            api_key_env: default_api_key_env(),
            api_timeout_secs: default_ai_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl DoctorSettings {
    /// Config switch combined with the environment flag
    pub fn globally_enabled(&self) -> bool {
        self.enabled && env_flag_enabled(std::env::var(DOCTOR_ENV_FLAG).ok().as_deref())
    }
}

/// Unset means enabled; `0`, `false`, `off` and `no` disable.
pub fn env_flag_enabled(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) => !matches!(v.as_str(), "0" | "false" | "off" | "no"),
        None => true,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret expected in `X-Termsage-Token`; empty disables auth
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_port() -> u16 {
    7391
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            auth_token: None,
        }
    }
}
