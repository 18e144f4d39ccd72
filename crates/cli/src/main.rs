//! `backscan` binary: serves newest-first log queries over HTTP, or runs a
//! single query from the command line.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::io::Write;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backscan_http::{AppState, HttpServer, LogQueryServer, router};
use backscan_notify::{NotificationCenter, spawn_heartbeat};
use backscan_query::{
    DEFAULT_BLOCK_SIZE, DEFAULT_LOG_DIR, DEFAULT_MAX_BATCH_SIZE, DEFAULT_REGISTRY_CAPACITY,
    QueryConfig, QueryParams, QueryService,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP server error
    #[error(transparent)]
    Http(#[from] backscan_http::Error),

    /// Writing results to stdout failed
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    /// Query error
    #[error(transparent)]
    Query(#[from] backscan_query::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory log file names are resolved under
    #[arg(long, default_value = DEFAULT_LOG_DIR, env = "BACKSCAN_LOG_DIR", global = true)]
    log_dir: PathBuf,

    /// Bytes read per backward step
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "BACKSCAN_BLOCK_SIZE", global = true)]
    block_size: NonZeroUsize,

    /// Maximum lines per batch
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BATCH_SIZE,
        env = "BACKSCAN_MAX_BATCH_SIZE",
        global = true
    )]
    max_batch_size: NonZeroUsize,

    /// Number of files whose per-file state is kept
    #[arg(
        long,
        default_value_t = DEFAULT_REGISTRY_CAPACITY,
        env = "BACKSCAN_REGISTRY_CAPACITY",
        global = true
    )]
    registry_capacity: NonZeroUsize,

    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Serve queries over HTTP (default)
    Serve,

    /// Print the matching lines of one file, newest first
    Scan(ScanArgs),
}

#[derive(Clone, Debug, clap::Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(
        long,
        default_value = "0.0.0.0:8001",
        env = "BACKSCAN_LISTEN_ADDR",
        global = true
    )]
    listen_addr: SocketAddr,

    /// Seconds between heartbeat messages
    #[arg(
        long,
        default_value_t = 1,
        env = "BACKSCAN_HEARTBEAT_INTERVAL_SECS",
        global = true
    )]
    heartbeat_interval_secs: u64,
}

#[derive(Clone, Debug, clap::Args)]
struct ScanArgs {
    /// File name relative to the log directory
    file_name: String,

    /// Only print the last N matching lines (0 prints all)
    #[arg(long, default_value_t = 0)]
    events: u64,

    /// Only print lines containing this string
    #[arg(long)]
    include: Option<String>,
}

impl Args {
    fn query_config(&self) -> QueryConfig {
        QueryConfig::new(self.log_dir.clone())
            .with_block_size(self.block_size)
            .with_max_batch_size(self.max_batch_size)
            .with_registry_capacity(self.registry_capacity)
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let service = QueryService::new(args.query_config());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(service, args.serve).await,
        Command::Scan(scan) => run_scan(service, scan).await,
    }
}

async fn run_server(service: QueryService, args: ServeArgs) -> Result<(), Error> {
    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            warn!(error = %e, "signal handler failed");
        }

        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    let heartbeats = Arc::new(NotificationCenter::new());
    let heartbeat = spawn_heartbeat(
        heartbeats.clone(),
        Duration::from_secs(args.heartbeat_interval_secs.max(1)),
        shutdown_token.clone(),
    );

    info!(
        log_dir = %service.config().log_dir.display(),
        block_size = service.config().block_size.get(),
        max_batch_size = service.config().max_batch_size.get(),
        "starting log query service"
    );

    let server = LogQueryServer::new(args.listen_addr);
    let handle = server
        .start(router(AppState::new(service, heartbeats)))
        .await?;

    tokio::select! {
        () = shutdown_token.cancelled() => {}
        _ = handle => info!("http server stopped on its own"),
    }

    shutdown_token.cancel();
    server.shutdown().await;
    let _ = heartbeat.await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received interrupt signal");
    Ok(())
}

async fn run_scan(service: QueryService, args: ScanArgs) -> Result<(), Error> {
    let mut params = QueryParams::new(args.file_name).last_n(args.events);
    if let Some(include) = args.include {
        params = params.include(include);
    }

    let lines = service.collect(params).await?;

    let mut stdout = std::io::stdout().lock();
    for line in &lines {
        writeln!(stdout, "{line}")?;
    }
    stdout.flush()?;

    Ok(())
}
