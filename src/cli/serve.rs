//! Serve command: run the local control API

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use termsage::config::Config;
use termsage::doctor::ErrorDoctor;
use termsage::memory::ErrorMemory;
use termsage::server::{start_http_server, ServerState};
use termsage::terminal::SessionManager;

pub async fn serve_command(config: &Config, port: Option<u16>, token: Option<String>) -> Result<()> {
    let memory = ErrorMemory::open_optional(&config.memory);
    let manager = Arc::new(SessionManager::new(config.terminal.clone(), memory.clone()));
    let doctor = Arc::new(ErrorDoctor::new(&config.doctor));
    let cleanup = manager.spawn_cleanup_task();

    let state = ServerState::new(
        manager.clone(),
        doctor,
        memory,
        tokio::runtime::Handle::current(),
    );
    let port = port.unwrap_or(config.server.port);
    let token = token.or_else(|| config.server.auth_token.clone());
    let server = start_http_server(state, port, token)?;

    println!("termsage listening on http://{}", server.addr());
    tokio::signal::ctrl_c().await?;

    info!("[termsage:http] Shutting down");
    cleanup.abort();
    manager.shutdown();
    tokio::task::spawn_blocking(move || server.shutdown()).await?;

    Ok(())
}
