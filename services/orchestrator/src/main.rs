//! callhub orchestrator
//!
//! Runs the agent worker supervisor, scaler and job router behind the HTTP
//! API, and drives call records from telephony webhooks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use callhub_orchestrator::{
    api,
    clock::SystemClock,
    config::{Config, StoreBackend},
    gateway::{LiveKitGateway, RoomGateway, UnconfiguredGateway},
    state::{AppState, Collaborators, ServiceConfig},
    store::{CallRecordStore, MemoryStore, PgStore},
    supervisor::{InstanceStatus, OsWorkerLauncher},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Per agent loop and per worker, not for the whole shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    info!(listen_addr = %config.listen_addr, store = ?config.store, "Starting callhub orchestrator");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(
        Collaborators {
            store: open_store(&config).await?,
            gateway: open_gateway(&config),
            launcher: Arc::new(OsWorkerLauncher::new(config.worker.clone())),
            clock: Arc::new(SystemClock),
        },
        ServiceConfig {
            supervisor: config.supervisor.clone(),
            scaling: config.scaling.clone(),
            calls: config.calls.clone(),
        },
        shutdown_rx.clone(),
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    let server = axum::serve(listener, api::create_router(state.clone()))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        joined = &mut server => match joined {
            Ok(Ok(())) => info!("HTTP server stopped"),
            Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
            Err(e) => error!(error = %e, "HTTP server task panicked"),
        },
    }

    let _ = shutdown_tx.send(true);
    drain(&state).await;
    info!("Orchestrator stopped");
    Ok(())
}

/// `RUST_LOG` wins over `CALLHUB_LOG_LEVEL`.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

async fn open_store(config: &Config) -> Result<Arc<dyn CallRecordStore>> {
    if config.store == StoreBackend::Memory {
        warn!("Call records are kept in memory and lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PgStore::connect(&config.database)
        .await
        .context("connecting to the call record database")?;
    if config.dev_mode {
        store
            .run_migrations()
            .await
            .context("applying migrations")?;
    }
    Ok(Arc::new(store))
}

fn open_gateway(config: &Config) -> Arc<dyn RoomGateway> {
    match LiveKitGateway::new(&config.livekit) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            warn!(error = %e, "LiveKit is not configured; outbound calls will fail");
            Arc::new(UnconfiguredGateway)
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    // A dropped sender also means shutdown.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Stop agent loops, then the workers. Workers sit in their own process
/// groups and would otherwise outlive us.
async fn drain(state: &AppState) {
    for handle in state.scaling().loops().cancel_all() {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("Agent loop ignored cancellation");
        }
    }

    let instances = match state.supervisor().list_instances(None).await {
        Ok(instances) => instances,
        Err(e) => {
            warn!(error = %e, "Cannot list workers to stop");
            return;
        }
    };
    // Errored workers may still be running.
    let live = instances
        .into_iter()
        .filter(|i| i.status.is_active() || i.status == InstanceStatus::Error);
    for instance in live {
        let id = instance.instance_id;
        match tokio::time::timeout(SHUTDOWN_GRACE, state.supervisor().stop(&id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(instance_id = %id, error = %e, "Worker stop failed"),
            Err(_) => warn!(instance_id = %id, "Worker did not stop in time"),
        }
    }
}
