//! Probe command: report what this machine supports

use anyhow::Result;

use termsage::config::Config;
use termsage::doctor::{AiProvider, ApiProvider, CliProvider};
use termsage::terminal::SessionManager;

pub async fn probe_command(config: &Config, json: bool) -> Result<()> {
    let manager = SessionManager::new(config.terminal.clone(), None);
    let capabilities = manager.capabilities();
    let cli_available = CliProvider::from_settings(&config.doctor).is_available();
    let api_configured = ApiProvider::from_settings(&config.doctor).is_some();
    let doctor_enabled = config.doctor.globally_enabled();

    if json {
        let value = serde_json::json!({
            "capabilities": capabilities,
            "backend": config.terminal.backend,
            "doctor": {
                "enabled": doctor_enabled,
                "cliAvailable": cli_available,
                "apiConfigured": api_configured,
            },
            "memory": {
                "enabled": config.memory.enabled,
                "dbPath": config.memory.resolve_db_path(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Platform:       {}", capabilities.platform);
    println!("Shell:          {}", capabilities.shell);
    println!("PTY available:  {}", yes_no(capabilities.pty_available));
    println!("Backend:        {:?}", config.terminal.backend);
    if let Some(home) = &capabilities.home {
        println!("Home:           {}", home.display());
    }
    println!();
    println!("Doctor enabled: {}", yes_no(doctor_enabled));
    println!(
        "  CLI found:    {} ({})",
        yes_no(cli_available),
        config.doctor.cli_binary
    );
    println!("  API key set:  {}", yes_no(api_configured));
    println!();
    println!("Learning:       {}", yes_no(config.memory.enabled));
    println!("  Store:        {}", config.memory.resolve_db_path().display());

    Ok(())
}
