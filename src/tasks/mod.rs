//! Background Tasks Module
//!
//! Periodic work that runs while the server is up.
//!
//! # Tasks
//! - Client sweep: routine cache eviction at `cache.cleanupIntervalHours`
//! - Server cleanup: orphan sweep plus expired file sweep at
//!   `cleanup.intervalHours`

mod cleanup;
mod scheduler;

pub use cleanup::{
    run_server_cleanup, schedule_client_sweep, schedule_server_cleanup, CLIENT_SWEEP_TASK,
    SERVER_CLEANUP_TASK,
};
pub use scheduler::{CleanupScheduler, TaskHandle};
