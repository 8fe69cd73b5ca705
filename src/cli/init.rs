//! Init command implementation

use anyhow::{bail, Result};
use std::path::PathBuf;

use termsage::config::{write_config_file, Config};

/// Default configuration content for termsage init
pub const DEFAULT_CONFIG: &str = r#"# termsage configuration
# =====================
#
# Every key is optional; removed keys fall back to the values shown here.

# ============================================================================
# TERMINAL - Sessions and process backends
# ============================================================================
#
#   backend - "auto" (PTY, simulator when PTYs are unavailable),
#             "native" (PTY only) or "simulated" (always the simulator)

[terminal]
# shell = "/bin/zsh"     # defaults to $SHELL, then /bin/bash
backend = "auto"
max_sessions = 10
idle_timeout_secs = 1800
cleanup_interval_secs = 300
default_cols = 80
default_rows = 24
# Output window handed to the error memory, in characters
output_buffer_chars = 1000
command_history = 10
spawn_retries = 3

# ============================================================================
# MEMORY - Learned error patterns
# ============================================================================

[memory]
enabled = true
# db_path = "~/.termsage/patterns.db"
# Output chunks inspected for a fix after an error
fix_capture_window = 8
min_fix_len = 10
similarity_threshold = 0.85

# ============================================================================
# DOCTOR - Error analysis
# ============================================================================
#
# TERMSAGE_ERROR_DOCTOR=0 disables the doctor regardless of this file.

[doctor]
enabled = true
cli_binary = "claude"
cli_args = ["-p"]
cli_timeout_secs = 30
api_url = "https://api.anthropic.com"
api_model = "claude-3-5-haiku-latest"
# The hosted API is only used when this variable is set
api_key_env = "ANTHROPIC_API_KEY"
api_timeout_secs = 30
max_tokens = 1024

# ============================================================================
# SERVER - Local control API
# ============================================================================

[server]
port = 7391
# Optional shared secret (sent as `X-Termsage-Token`); leave unset for no auth
# auth_token = ""
"#;

pub async fn init_command(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = config_path.unwrap_or_else(Config::global_config_path);

    if config_path.exists() && !force {
        bail!(
            "Configuration already exists: {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    write_config_file(&config_path, DEFAULT_CONFIG)?;
    println!("Created: {}", config_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use termsage::config::BackendStrategy;

    #[test]
    fn test_default_config_matches_defaults() {
        let parsed: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        let defaults = Config::default();

        assert_eq!(parsed.terminal.backend, BackendStrategy::Auto);
        assert_eq!(parsed.terminal.max_sessions, defaults.terminal.max_sessions);
        assert_eq!(parsed.terminal.output_buffer_chars, defaults.terminal.output_buffer_chars);
        assert_eq!(parsed.memory.fix_capture_window, defaults.memory.fix_capture_window);
        assert_eq!(parsed.doctor.cli_binary, defaults.doctor.cli_binary);
        assert_eq!(parsed.doctor.api_model, defaults.doctor.api_model);
        assert_eq!(parsed.server.port, defaults.server.port);
        assert!(parsed.server.auth_token.is_none());
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("termsage/config.toml");

        init_command(Some(path.clone()), false).await.unwrap();
        assert!(path.exists());
        assert!(init_command(Some(path.clone()), false).await.is_err());
        std::fs::write(&path, "[terminal]\nmax_sessions = 1\n").unwrap();
        init_command(Some(path.clone()), true).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);
        assert!(!path.with_extension("toml.tmp").exists());
    }
}
