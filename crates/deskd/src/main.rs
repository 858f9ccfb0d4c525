//! Desk Daemon - service-request quota and ticket API

use anyhow::Result;
use clap::Parser;
use deskd::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "deskd", version, about = "Service-request quota daemon")]
struct Args {
    /// Config file (default: /etc/deskd/config.toml, then /var/lib/deskd/config.toml)
    #[arg(long, env = "DESKD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    info!("Desk Daemon v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "  Database: {}, month offset: UTC{:+}m",
        config.database.path.display(),
        config.quota.utc_offset_minutes
    );

    deskd::server::run(config).await
}
