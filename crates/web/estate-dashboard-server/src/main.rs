use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use estate_dashboard_server::{AppState, Config, LogFormat, app};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "estate-dashboard-server", version, about = "Estate dashboard sign-in and session server")]
struct Cli {
    /// Configuration file; defaults to config.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config)?;
    config.log_sources();

    if cli.check_config {
        info!(provider = ?config.identity.provider, "configuration is valid");
        return Ok(());
    }

    let state = AppState::from_config(&config).await?;
    let sweeper = state.spawn_sweeper(config.idle_timeout(), config.sweep_interval());

    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, provider = ?config.identity.provider, bff = %state.bff.base_url(), "estate dashboard server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_filter()).context("Invalid log filter")?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match config.logging.format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
