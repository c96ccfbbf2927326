//! warden-node: serve one custody share over HTTP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use node::{http_server, NodeConfig, NodeState};

/// Warden custody node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the node's TOML config
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(&args.config)?;

    // Initialize tracing
    let log_level: tracing::Level = args
        .log_level
        .as_deref()
        .and_then(|level| level.parse().ok())
        .unwrap_or_else(|| config.log_level());
    let env_filter = || {
        EnvFilter::builder()
            .with_default_directive(log_level.into())
            .from_env_lossy()
    };

    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(env_filter());

    // optional daily rolling file next to stdout
    let (file_layer, _file_guard) = match config.log_dir.as_ref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "warden-node.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let node = config.build_node()?;
    let info = node.info();
    tracing::info!(
        index = info.index,
        threshold = info.threshold,
        nodes = info.nodes,
        domain = %info.domain,
        "starting custody node"
    );

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl+c: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    http_server::run(
        config.listen_addr,
        NodeState::new(node),
        log_level,
        shutdown_rx,
    )
    .await?;

    tracing::info!("Custody node shutdown complete");
    Ok(())
}
