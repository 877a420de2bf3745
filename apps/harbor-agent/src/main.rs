//! # Harbor Agent
//!
//! Headless host for the offline sync engine.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Agent Startup                                  │
//! │                                                                         │
//! │  1. Initialize Logging ───────────────────────────────────────────────► │
//! │     • tracing-subscriber with env filter (RUST_LOG)                     │
//! │                                                                         │
//! │  2. Load Configuration ───────────────────────────────────────────────► │
//! │     • harbor.toml in the platform config dir, HARBOR_* overrides        │
//! │                                                                         │
//! │  3. Open Store ───────────────────────────────────────────────────────► │
//! │     • SQLite file, migrations applied on connect                        │
//! │     • Stale synced cache entries removed                                │
//! │                                                                         │
//! │  4. Start Engine ─────────────────────────────────────────────────────► │
//! │     • Starts offline; the first probe decides                           │
//! │                                                                         │
//! │  5. Probe Loop + Event Log until Ctrl+C, then shutdown                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use harbor_core::Endpoint;
use harbor_db::{Database, DbConfig};
use harbor_sync::{
    HttpRemote, NetworkMonitor, RemoteApi, SyncConfig, SyncEngineBuilder, SyncEvent,
    TracingNotifier,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Harbor sync agent");

    let config = SyncConfig::load_or_default(None);
    let db_path = database_path(&config)?;
    info!(?db_path, api = %config.api.base_url, "Configuration loaded");

    let db = Database::new(DbConfig::new(db_path)).await?;
    info!("Database connected and migrations applied");

    let remote = Arc::new(HttpRemote::from_config(&config)?);
    let monitor = NetworkMonitor::new(false);

    let engine = SyncEngineBuilder::new(db, remote.clone(), config.user()?)
        .from_config(&config)
        .monitor(monitor.clone())
        .notifier(Arc::new(TracingNotifier))
        .start()
        .await?;

    match engine
        .cleanup_stale_data(config.storage.stale_after_days)
        .await
    {
        Ok(deleted) => debug!(deleted, "Stale cache cleanup finished"),
        Err(e) => warn!(error = %e, "Stale cache cleanup failed"),
    }

    let probe_path = Endpoint::parse(config.api.probe_path.as_str())?;
    let probe = tokio::spawn(probe_loop(
        remote,
        monitor,
        probe_path,
        config.probe_interval(),
    ));
    let events = tokio::spawn(log_events(engine.subscribe_events()));

    shutdown_signal().await;

    probe.abort();
    events.abort();
    engine.shutdown().await?;

    info!(pending = engine.state().pending_count, "Agent stopped");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=harbor_sync=trace` - Trace the engine only
/// - Default: INFO, DEBUG for harbor crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,harbor=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves the database file and makes sure its directory exists.
fn database_path(config: &SyncConfig) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = config
        .database_path()
        .ok_or("Could not determine app data directory")?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(path)
}

/// Feeds the monitor from a periodic reachability check.
async fn probe_loop(
    remote: Arc<HttpRemote>,
    monitor: NetworkMonitor,
    endpoint: Endpoint,
    every: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let online = remote.probe(&endpoint).await;
        monitor.set_online(online);
    }
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::OperationSynced { operation, .. }) => {
                debug!(operation_id = %operation.id(), endpoint = %operation.endpoint(), "Synced");
            }
            Ok(SyncEvent::OperationFailed {
                operation_id,
                message,
                retry_count,
            }) => {
                debug!(%operation_id, retry_count, %message, "Sync attempt failed");
            }
            Ok(SyncEvent::PassCompleted(report)) => {
                info!(
                    succeeded = report.succeeded,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Sync pass finished"
                );
            }
            Err(RecvError::Lagged(missed)) => warn!(missed, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, stopping agent");
}
