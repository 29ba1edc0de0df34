//! Pulse signal engine - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Market-signal decision engine for paper trading
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PULSE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    pulse_telemetry::init_logging()?;

    info!("Starting pulse-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > PULSE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PULSE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = pulse_bot::AppConfig::from_file(&config_path)?;
    info!(
        symbol = %config.session.symbol,
        timeframe = %config.session.timeframe,
        prices_url = %config.endpoints.prices_url,
        "Configuration loaded"
    );

    let app = pulse_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
