// silo-server binary entry point.
//
// Wires together the spooling configuration, filesystem backend, bridge,
// and the HTTP segment resource.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use silo_server::http;
use silo_server::resource::{NodeLocation, SegmentResource, StaticClusterNodes};
use silo_server::{FileSystemSpoolingBackend, SpoolingConfig, SpoolingManagerBridge};

/// CLI options for running a spooling coordinator.
#[derive(Parser, Debug)]
#[command(name = "silo-server")]
struct Args {
    #[arg(long, env = "SILO_LISTEN", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Root directory for spooled segment files.
    #[arg(long, env = "SILO_STORAGE_ROOT")]
    storage_root: String,

    /// 256 bit, base64-encoded secret key securing segment identifiers.
    #[arg(long, env = "SILO_SPOOLING_ENCRYPTION_KEY")]
    encryption_key: Option<String>,

    /// Redirect segment downloads to worker nodes.
    #[arg(long, env = "SILO_SPOOLING_WORKER_ACCESS", default_value_t = false)]
    worker_access: bool,

    /// Redirect clients straight to the storage backend when supported.
    #[arg(
        long,
        env = "SILO_SPOOLING_DIRECT_STORAGE_ACCESS",
        default_value_t = false
    )]
    direct_storage_access: bool,

    /// Comma-separated worker list like: `10.0.0.1:8080,10.0.0.2:8080`
    #[arg(long, env = "SILO_WORKERS", default_value = "")]
    workers: String,

    /// Time-to-live for spooled segments (seconds).
    #[arg(long, env = "SILO_SPOOLING_TTL_SECS", default_value_t = 7200)]
    ttl_secs: u64,
}

fn parse_workers(raw: &str) -> anyhow::Result<Vec<NodeLocation>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let addr: SocketAddr = entry
                .parse()
                .with_context(|| format!("invalid worker address: {entry}"))?;
            Ok(NodeLocation {
                host: addr.ip().to_string(),
                port: addr.port(),
            })
        })
        .collect()
}

#[tokio::main]
/// Parse CLI args, initialize logging, and run the segment server.
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,h2=warn,hyper=warn".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = SpoolingConfig {
        enabled: true,
        use_workers: args.worker_access,
        direct_storage_access: args.direct_storage_access,
        encryption_key: args.encryption_key.clone(),
        ttl: Duration::from_secs(args.ttl_secs),
        ..Default::default()
    };
    config.apply_env();
    config.validate()?;

    let backend = Arc::new(FileSystemSpoolingBackend::new(
        args.storage_root.clone(),
        config.ttl,
    ));
    let bridge = Arc::new(SpoolingManagerBridge::new(&config, Some(backend))?);

    let workers = parse_workers(&args.workers)?;
    let cluster = Arc::new(StaticClusterNodes::new(workers, true));
    let resource = Arc::new(SegmentResource::new(
        bridge,
        cluster,
        config.use_workers,
        config.direct_storage_access,
    ));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    info!(listen = %args.listen, storage_root = %args.storage_root, "segment server started");

    axum::serve(listener, http::router(resource))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
