//! depot — keep local directories in sync with the newest artifact held
//! across redundant object-storage replicas.
//!
//! # Usage
//!
//! ```text
//! depot --config-path /etc/depot/            # sync everything once
//! depot --config-path depot.yaml --interval 60
//! ```
//!
//! One-shot mode exits non-zero on any error. Interval mode never exits on
//! a sync error; it logs, adjusts metrics, and waits for the next tick.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use depot_daemon::{metrics, server, Scheduler, SyncMetrics};

#[derive(Parser, Debug)]
#[command(
    name = "depot",
    version,
    about = "Synchronize local directories with the newest artifact across object-storage replicas",
    long_about = None,
)]
struct Cli {
    /// Path to the configuration file or directory.
    #[arg(long)]
    config_path: PathBuf,

    /// How often to synchronize, in seconds. Runs exactly once when omitted.
    #[arg(long)]
    interval: Option<u64>,

    /// Listening address for the metrics/health HTTP server.
    #[arg(long, default_value = "0.0.0.0:10010")]
    http_address: SocketAddr,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Log level (overridden by RUST_LOG when set).
    #[arg(long, value_enum, default_value_t = LogLevel::Debug)]
    log_level: LogLevel,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn init_tracing(format: LogFormat, level: LogLevel) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    match format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).with_target(false).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.log_level);

    let config = depot_core::load(&cli.config_path)
        .with_context(|| format!("loading config from {}", cli.config_path.display()))?;

    let registry = metrics::registry()?;
    let sync_metrics = SyncMetrics::register(&registry)?;
    let scheduler = Scheduler::new(&config).await.context("building sync units")?;
    tracing::debug!(units = scheduler.unit_count(), "configuration loaded");

    let shutdown = CancellationToken::new();
    let server_handle = tokio::spawn(server::serve(
        cli.http_address,
        registry,
        shutdown.clone(),
    ));

    let signal_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received ctrl-c, shutting down");
                shutdown.cancel();
            }
        })
    };

    let interval = cli.interval.map(Duration::from_secs);
    let run_result = scheduler.run(interval, &sync_metrics, &shutdown).await;

    shutdown.cancel();
    server_handle.await.context("joining HTTP server task")??;
    signal_handle.abort();

    run_result.context("running sync")?;
    Ok(())
}
