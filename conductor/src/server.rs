//! Coordinator wiring: state construction, background tasks, HTTP serving

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use conductor_core::Config;
use conductor_registry::{
    create_router, spawn_eviction_sweep, AppState, DegradationRouter, HealthCache, HttpForwarder,
    HttpProber, InMemoryRegistry, RegistryStore,
};

/// Run the coordinator until a shutdown signal arrives
pub async fn run(config: Config) -> Result<()> {
    let store: Arc<dyn RegistryStore> =
        Arc::new(InMemoryRegistry::new(config.staleness_window_seconds()));

    let health = Arc::new(HealthCache::new(
        Arc::new(HttpProber::new()),
        Duration::from_secs(config.health.cache_ttl_seconds),
        Duration::from_secs(config.health.probe_timeout_seconds),
    ));

    let forwarder = Arc::new(HttpForwarder::new(Duration::from_secs(
        config.coordinator.request_timeout_seconds,
    )));

    let router = Arc::new(DegradationRouter::new(
        &config.capabilities,
        config.dependencies.clone(),
        store.clone(),
        health.clone(),
        forwarder,
    )?);
    info!(capabilities = config.capabilities.len(), "Degradation router ready");

    let cancel = CancellationToken::new();
    let sweeper = spawn_eviction_sweep(
        store.clone(),
        Duration::from_secs(config.registry.eviction_interval_seconds),
        cancel.clone(),
    );

    let state = AppState::new(store, health, router, config.registry.auth_token.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_address()).await?;
    info!("Coordinator listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Scoped teardown: background tasks are joined before we return
    info!("Shutting down background tasks");
    cancel.cancel();
    if let Err(e) = sweeper.await {
        error!("Eviction sweep join failed: {e}");
    }

    info!("Coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {e}");
            // Without a signal handler we would shut down immediately;
            // park instead and rely on external process supervision
            std::future::pending::<()>().await;
        }
    }
}
