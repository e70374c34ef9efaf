//! Bloatprobe server binary

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bloatprobe::config::{CliArgs, Config};
use bloatprobe::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = Config::from_args(&args).context("invalid configuration")?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        "Bloatprobe v{}: {} byte download chunks, upload ceiling {} bytes at {} bytes/s",
        env!("CARGO_PKG_VERSION"),
        config.download.chunk_size,
        config.upload.max_size,
        config.upload.max_rate
    );

    let server = Server::bind(config)
        .await
        .context("failed to start server")?;
    server.run().await?;

    Ok(())
}
