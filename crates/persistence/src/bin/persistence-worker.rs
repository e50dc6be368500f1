//! persistence-worker — runs the offer persistence service.
//!
//! Consumes `OfferInput` and writes artifacts until SIGINT/SIGTERM, then
//! drains and exits.

use anyhow::Context;
use clap::Parser;
use tracing::info;

use offerpipe_core::config::load_dotenv;
use offerpipe_core::Config;

/// Offer persistence service.
#[derive(Parser, Debug)]
#[command(name = "persistence-worker", version, about)]
struct Cli {
    /// Print the resolved configuration and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let config = Config::from_env().context("loading configuration")?;
    config.log_summary();
    if cli.print_config {
        return Ok(());
    }

    let handle = offerpipe_persistence::start(&config)
        .await
        .context("starting persistence service")?;

    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }

    handle.shutdown().await;
    Ok(())
}
