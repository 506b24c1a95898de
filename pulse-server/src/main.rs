//! # Pulse Server
//!
//! # Usage
//!
//! ```bash
//! # Read records from stdin with default configuration
//! cat ticks.ndjson | pulse-server
//!
//! # Custom configuration and a feed file
//! pulse-server --config /etc/pulse/config.yaml --feed ticks.ndjson
//!
//! # Environment overrides
//! PULSE_POOL_MAX_SIZE=200 pulse-server
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use pulse_server::{FeedSource, PulseServer, ServerConfig};

/// Pulse alert distribution server
#[derive(Parser, Debug)]
#[command(name = "pulse-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Newline-delimited JSON records to process; stdin when omitted
    #[arg(short, long, env = "PULSE_FEED")]
    feed: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;

    if args.validate {
        println!("Configuration is valid");
        return Ok(());
    }

    let source = args.feed.map_or(FeedSource::Stdin, FeedSource::File);

    let mut server = PulseServer::new(config);
    server.initialize().await.context("initializing server")?;
    let stats = server.run(source).await.context("running server")?;

    info!(
        records = stats.records,
        skipped = stats.skipped,
        alerts = stats.alerts,
        "Pulse server stopped"
    );
    Ok(())
}

/// Loads configuration from file and applies command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = if args.config.exists() {
        PulseServer::load_config(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        eprintln!(
            "Configuration file not found: {}, using defaults",
            args.config.display()
        );
        ServerConfig::default()
    };

    if args.debug {
        config.logging.level = "debug".to_string();
    }

    Ok(config)
}
