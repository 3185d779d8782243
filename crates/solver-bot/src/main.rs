//! Delta-neutral RFQ solver - entry point.
//!
//! Quotes BTC/USD swaps on the intents bus, prices them against the
//! perpetual venue's live book, and hedges every settlement immediately.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Delta-neutral RFQ market-making solver
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SOLVER_CONFIG)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    solver_telemetry::init_logging(solver_telemetry::LogFormat::from_env())?;
    info!("Starting solver v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("SOLVER_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %config_path, "Loading configuration");

    let config = solver_bot::AppConfig::from_file(&config_path)?;
    let app = solver_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
