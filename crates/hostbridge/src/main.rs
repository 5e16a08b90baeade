//! hostbridged - local policy daemon for browser automation
//!
//! Usage:
//!   hostbridged [--listen 127.0.0.1:17321] [--config-dir DIR] [--data-dir DIR]
//!
//! The pairing code is printed to the log; type it into the browser
//! extension to obtain a token.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hostbridge::daemon::Daemon;
use hostbridge::server;
use hostbridge_core::Paths;

#[derive(Parser)]
#[command(name = "hostbridged")]
#[command(version)]
#[command(about = "Local policy daemon that lets chat-site automation touch this machine")]
struct Args {
    /// Loopback address to listen on
    #[arg(long, env = "HOSTBRIDGE_LISTEN", default_value = "127.0.0.1:17321")]
    listen: SocketAddr,

    /// Directory holding policy.yaml, tokens and site keys
    #[arg(long, env = "HOSTBRIDGE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Directory holding audit logs and backups
    #[arg(long, env = "HOSTBRIDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Seconds between sweeps of expired pending operations
    #[arg(long, default_value_t = 30)]
    sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if !args.listen.ip().is_loopback() {
        bail!("refusing to listen on non-loopback address {}", args.listen);
    }
    if args.sweep_interval_secs == 0 {
        bail!("--sweep-interval-secs must be greater than zero");
    }

    let paths = Paths::with_dirs(args.config_dir, args.data_dir);
    info!(
        "Starting hostbridge (config {}, data {})",
        paths.config.display(),
        paths.data.display()
    );

    let daemon = Arc::new(Daemon::open(&paths).await?);
    let (code, expires_at) = daemon.pair_code();
    info!("Pairing code: {} (expires {})", code, expires_at);
    info!("Admin token written to {}", paths.admin_token_file().display());

    let sweeper = daemon.clone();
    let interval = Duration::from_secs(args.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let freed = sweeper.sweep();
            if freed > 0 {
                debug!("Swept {} expired pending entries", freed);
            }
        }
    });

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    server::serve(daemon, listener).await
}
