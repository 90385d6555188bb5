mod api;
mod args;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use api::AppState;
use args::Args;
use scouter_common::ServiceConfig;
use scouter_dispatcher::Dispatcher;
use scouter_fabric::RawChannel;
use scouter_probes::{NativeEngine, ProbeContext};
use scouter_storage::MemoryJobStore;

const PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let listen = args.listen.clone().unwrap_or_else(|| config.listen.clone());

    if !RawChannel::is_available() {
        warn!("raw sockets unavailable, ping and traceroute probes will fail");
    }

    let engine = Arc::new(NativeEngine::new(ProbeContext::new(&config.asn_database)));
    let store = Arc::new(MemoryJobStore::new(config.receipt_ttl));
    let _purge = store.spawn_purge_task(PURGE_INTERVAL);
    let dispatcher = Arc::new(Dispatcher::new(
        engine,
        store,
        config.max_test_count,
        config.max_process_count,
    ));

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(
        listen = %listen,
        engine = dispatcher.engine_name(),
        max_test_count = config.max_test_count,
        max_process_count = config.max_process_count,
        ttl_secs = config.receipt_ttl.as_secs(),
        "scouter ready"
    );

    let app = api::router(AppState::new(dispatcher, &config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("scouter stopped");
    Ok(())
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
