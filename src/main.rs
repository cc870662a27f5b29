//! Pixel Cache server binary
//!
//! Serves the cache API over HTTP and runs memory monitoring and periodic
//! cleanup in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixel_cache::api::{create_router, AppState};
use pixel_cache::cache::CacheStore;
use pixel_cache::memory::MemoryMonitor;
use pixel_cache::metadata::{InMemoryMetadataStore, OrphanSweeper};
use pixel_cache::tasks::{schedule_client_sweep, schedule_server_cleanup, CleanupScheduler};
use pixel_cache::{CacheCoordinator, Config};

/// Main entry point for the Pixel Cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration (settings file, then environment overrides)
/// 3. Open the on-disk cache store
/// 4. Start the memory monitor with the pressure sweep callback
/// 5. Schedule the client sweep and the server cleanup job over the
///    metadata store the API writes to
/// 6. Serve the HTTP API until SIGINT/SIGTERM
/// 7. Stop background work and close the store
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixel_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pixel Cache Server");

    let config = Config::load().context("failed to load configuration")?;
    info!(
        max_size_mb = config.cache.max_size_mb,
        ttl_hours = config.cache.ttl_hours,
        directory = %config.cache.directory.display(),
        memory_limit = %config.memory.limit,
        port = config.server.port,
        "Configuration loaded"
    );

    let store = Arc::new(
        CacheStore::open_dir(&config.cache.directory)
            .await
            .context("failed to open cache directory")?,
    );
    let coordinator = CacheCoordinator::from_config(Arc::clone(&store), &config.cache);

    let monitor = MemoryMonitor::from_config(&config).context("invalid memory settings")?;
    monitor.register(coordinator.memory_callback()?);
    monitor.start();

    let scheduler = CleanupScheduler::new();
    schedule_client_sweep(
        &scheduler,
        coordinator.clone(),
        config.cache.cleanup_interval(),
    );
    let metadata_store = Arc::new(InMemoryMetadataStore::new());
    let sweeper = Arc::new(OrphanSweeper::from_config(
        metadata_store.clone(),
        &config.cleanup,
    ));
    schedule_server_cleanup(
        &scheduler,
        Arc::clone(&sweeper),
        coordinator.clone(),
        &config.cleanup,
    );

    let state = AppState::new(coordinator, monitor.clone()).with_metadata(metadata_store, sweeper);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    monitor.stop();
    scheduler.stop();
    store.close().await.context("failed to close cache store")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
