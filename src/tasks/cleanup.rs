//! Hosted Cleanup Jobs
//!
//! The periodic jobs the binary runs on a [`CleanupScheduler`]:
//! - Client sweep: routine size/TTL eviction, first run one interval after
//!   startup
//! - Server cleanup: the orphan sweep followed by an age-only sweep of the
//!   disk cache, first run after `cleanup.initialDelayMinutes`

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CleanupSettings;
use crate::coordinator::CacheCoordinator;
use crate::metadata::OrphanSweeper;
use crate::tasks::{CleanupScheduler, TaskHandle};

pub const CLIENT_SWEEP_TASK: &str = "client-sweep";
pub const SERVER_CLEANUP_TASK: &str = "server-cleanup";

/// Schedules the routine eviction sweep every `interval`.
pub fn schedule_client_sweep(
    scheduler: &CleanupScheduler,
    coordinator: CacheCoordinator,
    interval: Duration,
) -> TaskHandle {
    scheduler.schedule(CLIENT_SWEEP_TASK, interval, interval, move || {
        let coordinator = coordinator.clone();
        async move {
            if !coordinator.maintenance_sweep().await {
                warn!("Routine cache sweep failed");
            }
        }
    })
}

/// Schedules the server cleanup job, or does nothing when
/// `cleanup.enabled` is false.
pub fn schedule_server_cleanup(
    scheduler: &CleanupScheduler,
    sweeper: Arc<OrphanSweeper>,
    coordinator: CacheCoordinator,
    settings: &CleanupSettings,
) -> Option<TaskHandle> {
    if !settings.enabled {
        info!("Server cleanup disabled by configuration");
        return None;
    }

    let max_file_age_ms = settings.max_file_age_ms();
    let handle = scheduler.schedule(
        SERVER_CLEANUP_TASK,
        settings.interval(),
        settings.initial_delay(),
        move || {
            let sweeper = Arc::clone(&sweeper);
            let coordinator = coordinator.clone();
            async move { run_server_cleanup(&sweeper, &coordinator, max_file_age_ms).await }
        },
    );
    Some(handle)
}

/// One server cleanup run. Each half runs even if the other fails.
pub async fn run_server_cleanup(
    sweeper: &OrphanSweeper,
    coordinator: &CacheCoordinator,
    max_file_age_ms: u64,
) {
    let report = sweeper.sweep().await;
    debug!(deleted = report.total_deleted(), "Metadata hygiene done");

    match coordinator.sweep_outcome(u64::MAX, max_file_age_ms).await {
        Ok(outcome) if outcome.deleted_count > 0 => {
            info!(deleted = outcome.deleted_count, "Removed expired cache files");
        }
        Ok(_) => debug!("No expired cache files"),
        Err(e) => warn!(error = %e, "Expired file sweep failed"),
    }
}
