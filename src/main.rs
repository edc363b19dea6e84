//! Route Governor
//!
//! A demo server whose routes are governed by live policy rows.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                  ROUTE GOVERNOR                  │
//!   Client Request   │  ┌─────────┐    ┌───────────┐    ┌───────────┐   │
//!  ──────────────────┼─▶│  http   │───▶│ admission │───▶│  handler  │   │
//!                    │  │ server  │    │middleware │    │  (echo)   │   │
//!                    │  └─────────┘    └─────┬─────┘    └───────────┘   │
//!                    │                       │ reads                    │
//!                    │                       ▼                          │
//!                    │               ┌──────────────┐                   │
//!                    │               │  governance  │◀── refresher ◀────┼── store
//!                    │               │  registries  │                   │
//!                    │               └──────────────┘                   │
//!                    │  ┌────────┐ ┌─────────────┐ ┌─────────┐           │
//!                    │  │ config │ │observability│ │  admin  │           │
//!                    │  └────────┘ └─────────────┘ └─────────┘           │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use route_governor::admin::{setup_admin_router, AdminState};
use route_governor::config::{load_config, GovernorConfig, StoreWatcher};
use route_governor::governance::{AlarmCenter, GovernanceController, PolicyRefresher};
use route_governor::http::{AdmissionState, HttpServer};
use route_governor::lifecycle::{wait_for_signal, Shutdown};
use route_governor::observability::{logging, metrics};
use route_governor::store::{FileStore, MemoryStore, PolicyStore};

#[derive(Parser)]
#[command(name = "route-governor")]
#[command(about = "Per-route request governance server", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GovernorConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("route-governor v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        refresh_interval_secs = config.refresh.interval_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let controller = Arc::new(GovernanceController::new(
        config.route_keys()?,
        config.signing.default_keys.clone(),
    ));

    let store: Arc<dyn PolicyStore> = match &config.store.path {
        Some(path) => Arc::new(FileStore::new(path)),
        None => {
            tracing::warn!("No store.path configured, policy rows are held in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let alarms = Arc::new(AlarmCenter::new(
        controller.emails.clone(),
        config.governance.alarm_group.clone(),
        config.governance.alarm_history,
    ));

    let refresher = Arc::new(PolicyRefresher::new(
        store,
        controller.clone(),
        alarms.clone(),
        Duration::from_secs(config.refresh.interval_secs),
    ));

    // Boot refresh; a failure leaves every route ungoverned until the next tick.
    if let Err(e) = refresher.refresh().await {
        tracing::warn!(error = %e, "Initial policy refresh failed");
    }

    let shutdown = Shutdown::new();

    tokio::spawn(refresher.clone().run(shutdown.subscribe()));

    if let (Some(path), true) = (&config.store.path, config.store.watch) {
        let watcher = StoreWatcher::new(Path::new(path), refresher.clone());
        tokio::spawn(watcher.run_until(shutdown.subscribe()));
    }

    if config.admin.enabled {
        let admin = setup_admin_router(AdminState {
            refresher: refresher.clone(),
            alarms: alarms.clone(),
            api_key: config.admin.api_key.as_str().into(),
        });
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let stop = shutdown.signalled();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, admin).with_graceful_shutdown(stop).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    let state = AdmissionState::new(controller)
        .trust_forwarded_for(config.governance.trust_forwarded_for);
    let server = HttpServer::new(&config, state)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let server_shutdown = shutdown.signalled();
    let server_task = tokio::spawn(server.run(listener, server_shutdown));

    wait_for_signal().await;
    tracing::info!("Shutdown signal received");
    shutdown.trigger();

    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
