//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheStats, SweepOutcome};
use crate::memory::{MemoryStatus, Urgency};
use crate::metadata::Collection;

/// Response body for PUT /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct PutResponse {
    /// Success message
    pub message: String,
    /// The key that was stored
    pub key: String,
    /// Payload size in bytes
    pub size: u64,
}

impl PutResponse {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' stored successfully", key),
            key,
            size,
        }
    }
}

/// Response body for DELETE /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Sum of live entry sizes in bytes
    pub total_size: u64,
    /// Number of live entries
    pub count: u64,
    /// Mean entry size, 0 when empty
    pub average_size: f64,
    /// Configured size budget in bytes
    pub max_size_bytes: u64,
    /// `total_size` as a percentage of the budget
    pub usage_percentage: f64,
    /// Usage above 80% of the budget
    pub near_capacity: bool,
}

impl StatsResponse {
    pub fn new(stats: &CacheStats, max_size_bytes: u64) -> Self {
        Self {
            total_size: stats.total_size,
            count: stats.count,
            average_size: stats.average_size,
            max_size_bytes,
            usage_percentage: stats.usage_percentage(max_size_bytes),
            near_capacity: stats.is_near_capacity(max_size_bytes),
        }
    }
}

/// Response body for POST /sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepResponse {
    pub deleted_count: u64,
    pub remaining_size: u64,
    pub failed_count: u64,
}

impl From<SweepOutcome> for SweepResponse {
    fn from(outcome: SweepOutcome) -> Self {
        Self {
            deleted_count: outcome.deleted_count,
            remaining_size: outcome.remaining_size,
            failed_count: outcome.failed_count,
        }
    }
}

/// Response body for POST /clear
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
}

impl ClearResponse {
    pub fn cleared() -> Self {
        Self {
            message: "Cache cleared".to_string(),
        }
    }
}

/// Response body for POST /memory/check
#[derive(Debug, Clone, Serialize)]
pub struct MemoryCheckResponse {
    /// False when the monitor is not running and no check was queued
    pub check_requested: bool,
    pub status: MemoryStatus,
}

/// Response body for POST /memory/cleanup
#[derive(Debug, Clone, Serialize)]
pub struct MemoryCleanupResponse {
    pub urgency: Urgency,
    /// Number of registered callbacks that ran
    pub callbacks: usize,
}

/// Response body for the metadata write endpoints
#[derive(Debug, Clone, Serialize)]
pub struct MetadataWriteResponse {
    pub collection: Collection,
    pub id: String,
}

impl MetadataWriteResponse {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

/// Response body for GET /metadata
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataCountsResponse {
    pub studies: usize,
    pub series: usize,
    pub instances: usize,
    pub user_sessions: usize,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
