//! Gateway Entry Point

// Layer 1: Standard library imports
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Layer 3: Internal module imports
use airs_warden::app::{App, Config, OperationMode};

#[derive(Parser)]
#[command(name = "airs-warden", about = "Identity-aware policy decision and enforcement gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway
    Serve {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,

        #[command(subcommand)]
        mode: Mode,
    },
}

#[derive(Subcommand)]
enum Mode {
    /// Answer policy decisions for an external reverse proxy
    Decision,

    /// Forward allowed requests to the matched rule's backend
    Proxy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, mode } => {
            let config = Config::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;

            let mode = match mode {
                Mode::Decision => OperationMode::Decision,
                Mode::Proxy => OperationMode::Proxy,
            };

            let app = App::bootstrap(config, mode).context("bootstrapping the gateway")?;

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    signal_token.cancel();
                }
            });

            app.start(shutdown).await.context("running the gateway")?;
        }
    }

    Ok(())
}
