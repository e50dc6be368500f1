//! importer-worker — feeds offer documents into the pipeline.
//!
//! Reads newline-delimited documents from stdin (or a file) and submits
//! each through the configured strategy: logged locally, or published to
//! the `OfferInput` queue for the persistence service.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::info;

use offerpipe_core::config::{load_dotenv, BusConfig, ImporterConfig, ProcessEnv};
use offerpipe_importer::{build_strategy, DocumentProcessor};

/// Offer document importer.
#[derive(Parser, Debug)]
#[command(name = "importer-worker", version, about)]
struct Cli {
    /// Read documents from this file instead of stdin, one per line.
    #[arg(long)]
    input: Option<PathBuf>,
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

    let importer = ImporterConfig::from_source(&ProcessEnv).context("importer configuration")?;
    let bus = BusConfig::from_source(&ProcessEnv).context("bus configuration")?;
    info!(strategy = %importer.strategy, "starting importer");

    let strategy = build_strategy(&importer, &bus)
        .await
        .context("building delivery strategy")?;
    let processor = DocumentProcessor::start(strategy, importer.queue_capacity);

    let reader: Box<dyn AsyncRead + Unpin> = match &cli.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(reader).lines();

    let mut submitted = 0u64;
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("reading input")? {
                Some(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    processor
                        .submit(line)
                        .await
                        .context("submitting document")?;
                    submitted += 1;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping intake");
                break;
            }
        }
    }

    let delivered = processor.stop().await;
    info!(submitted, delivered, "importer finished");
    Ok(())
}
