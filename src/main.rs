use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use termsage::config::Config;

mod cli;

#[derive(Parser)]
#[command(name = "termsage")]
#[command(about = "Terminal sessions that remember how you fixed your errors")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to ~/.termsage/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the local control API
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Shared secret clients must send as X-Termsage-Token
        #[arg(long)]
        token: Option<String>,
    },

    /// Open a session and attach this terminal to it (default)
    Shell {
        /// Working directory for the session (defaults to home)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Ask the error doctor about an error
    Analyze {
        /// Error text; read from --file or stdin when omitted
        text: Option<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Directory the error happened in (defaults to the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// List learned error patterns
    Patterns {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Show store counters instead of patterns
        #[arg(long)]
        stats: bool,

        #[arg(long)]
        json: bool,
    },

    /// Report PTY support, shell and doctor availability
    Probe {
        #[arg(long)]
        json: bool,
    },

    /// Write a commented ~/.termsage/config.toml
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with session output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    if let Some(Commands::Init { force }) = cli.command {
        return cli::init::init_command(cli.config, force).await;
    }

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Serve { port, token }) => {
            cli::serve::serve_command(&config, port, token).await?;
        }
        Some(Commands::Shell { cwd }) => {
            cli::shell::shell_command(&config, cwd).await?;
        }
        Some(Commands::Analyze {
            text,
            file,
            cwd,
            json,
        }) => {
            let args = cli::analyze::AnalyzeArgs {
                text,
                file,
                cwd,
                json,
            };
            cli::analyze::analyze_command(&config, args).await?;
        }
        Some(Commands::Patterns { limit, stats, json }) => {
            cli::patterns::patterns_command(&config, limit, stats, json).await?;
        }
        Some(Commands::Probe { json }) => {
            cli::probe::probe_command(&config, json).await?;
        }
        Some(Commands::Init { .. }) => {}
        None => {
            cli::shell::shell_command(&config, None).await?;
        }
    }

    Ok(())
}
