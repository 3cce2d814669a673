//! murmurd — the murmur background daemon.
//!
//! Binds the control socket under the base directory and serves CLI
//! connections until a signal arrives; the signal path runs Offline
//! semantics best-effort and removes the socket file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_core::control::{default_base_dir, socket_path};
use murmur_daemon::{server, Daemon, DaemonConfig};

#[derive(Parser)]
#[command(name = "murmurd", about = "murmur background daemon")]
struct Args {
    /// Base directory for the control socket (defaults to ~/.murmur).
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Dial deadline in seconds; 0 waits forever.
    #[arg(long, default_value_t = 5)]
    dial_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let base = args.dir.unwrap_or_else(default_base_dir);
    let dial_timeout = match args.dial_timeout {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let config = DaemonConfig::new()
        .socket_path(socket_path(&base))
        .dial_timeout(dial_timeout);

    let socket = config.socket().to_path_buf();
    let listener = server::bind(&socket)
        .with_context(|| format!("cannot bind control socket at {}", socket.display()))?;
    info!(socket = %socket.display(), "control socket ready");

    let daemon = Arc::new(Daemon::new(config));
    let result = tokio::select! {
        served = server::serve(daemon.clone(), listener) => {
            served.context("control server failed")
        }
        signal = shutdown_signal() => {
            info!("signal received, going offline");
            daemon.shutdown().await;
            signal
        }
    };

    let _ = std::fs::remove_file(&socket);
    result
}

async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    Ok(())
}
