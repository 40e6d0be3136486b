//! # Depot Agent
//!
//! Local process that keeps a field device working without a connection.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. tracing (RUST_LOG, default "info,depot=debug,sqlx=warn")            │
//! │  2. DepotConfig: defaults → depot.toml → DEPOT_* env → validate         │
//! │  3. SQLite queue store + cache sets (migrations on open)                │
//! │  4. SyncEngine: one scheduler per queue, starts offline                 │
//! │  5. GatewayServer: install + activate caches, then listen               │
//! │  6. Ctrl+C / SIGTERM → stop server, drain running batches, close DB     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `depot-agent [path/to/depot.toml]`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use depot_db::{Database, DbConfig};
use depot_sync::{CacheGateway, DepotConfig, GatewayServer, HttpFetcher, SyncEngineBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Depot agent...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = DepotConfig::load(config_path)?;
    info!(
        device = %config.device_id(),
        api = %config.api.base_url,
        sync_enabled = config.is_sync_enabled(),
        "Configuration loaded"
    );

    let db_path = config.storage.resolved_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(DbConfig::new(db_path.clone())).await?;
    info!(path = %db_path.display(), "Database ready");

    let engine = Arc::new(SyncEngineBuilder::new(config.clone()).build(&db)?);

    let gateway = if config.gateway.enabled {
        let fetcher = Arc::new(HttpFetcher::new(config.api.request_timeout())?);
        let gateway = CacheGateway::new(&config.gateway, Arc::new(db.cache_sets()), fetcher)?;
        Some(Arc::new(gateway))
    } else {
        info!("Cache gateway disabled, serving the control API only");
        None
    };

    let listen_addr: SocketAddr = config.gateway.listen_addr.parse()?;
    let server = GatewayServer::new(listen_addr, Arc::clone(&engine), gateway)
        .start()
        .await?;
    info!(addr = %server.local_addr(), "Depot agent running");

    shutdown_signal().await;

    if let Err(e) = server.shutdown().await {
        error!(error = %e, "Gateway server did not stop cleanly");
    }
    engine.shutdown().await?;
    db.close().await;

    info!("Depot agent stopped");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=depot_sync=trace` - Trace the sync engine only
/// - Default: INFO, DEBUG for depot crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,depot=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
