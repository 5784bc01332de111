#![warn(missing_docs)]

//! claimwatch binary.

use anyhow::Result;
use clap::Parser;
use claimwatch::cli::{Cli, LogFormat};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            // Keep the sender alive; a dropped sender stops the watch.
            std::future::pending::<()>().await;
        }
        tracing::info!("Received ctrl-c, shutting down...");
        let _ = shutdown_tx.send(true);
    });

    cli.run(shutdown_rx).await
}
