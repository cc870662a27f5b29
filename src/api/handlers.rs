//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

use crate::cache::{validate_key, CacheEntry};
use crate::coordinator::CacheCoordinator;
use crate::error::{CacheError, Result};
use crate::memory::{MemoryMonitor, MemoryStatus};
use crate::metadata::{
    Collection, InMemoryMetadataStore, Instance, OrphanSweepReport, OrphanSweeper, Series, Study,
    UserSession,
};
use crate::models::{
    metadata_from_headers, ClearResponse, DeleteResponse, HealthResponse, MemoryCheckResponse,
    MemoryCleanupRequest, MemoryCleanupResponse, MetadataCountsResponse, MetadataWriteResponse,
    PutResponse, StatsResponse, SweepRequest, SweepResponse, META_HEADER_PREFIX,
};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub coordinator: CacheCoordinator,
    pub monitor: MemoryMonitor,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub sweeper: Arc<OrphanSweeper>,
}

impl AppState {
    /// State with an empty metadata store and a default orphan sweeper.
    pub fn new(coordinator: CacheCoordinator, monitor: MemoryMonitor) -> Self {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let sweeper = Arc::new(OrphanSweeper::new(metadata.clone()));
        Self {
            coordinator,
            monitor,
            metadata,
            sweeper,
        }
    }

    /// Serves `metadata` and sweeps it with `sweeper`, which should be the
    /// one the cleanup scheduler runs.
    pub fn with_metadata(
        mut self,
        metadata: Arc<InMemoryMetadataStore>,
        sweeper: Arc<OrphanSweeper>,
    ) -> Self {
        self.metadata = metadata;
        self.sweeper = sweeper;
        self
    }
}

/// Handler for PUT /cache/:key
///
/// Stores the raw request body; `x-cache-meta-*` headers become metadata.
pub async fn put_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PutResponse>> {
    validate_key(&key)?;
    let metadata = metadata_from_headers(&headers);
    let size = body.len() as u64;

    if !state.coordinator.put(&key, body.to_vec(), metadata).await {
        return Err(CacheError::Storage(format!("failed to store '{}'", key)));
    }
    Ok(Json(PutResponse::new(key, size)))
}

/// Handler for GET /cache/:key
///
/// Returns the payload as `application/octet-stream` with its metadata
/// echoed back as `x-cache-meta-*` headers.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response> {
    validate_key(&key)?;
    match state.coordinator.get_entry(&key).await {
        Some(entry) => Ok(entry_response(entry)),
        None => Err(CacheError::NotFound(key)),
    }
}

fn entry_response(entry: CacheEntry) -> Response {
    let mut headers = HeaderMap::new();
    for (field, value) in &entry.metadata {
        let name = HeaderName::from_bytes(format!("{}{}", META_HEADER_PREFIX, field).as_bytes());
        match (name, HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(key = %entry.key, field = %field, "Metadata not representable as a header"),
        }
    }
    (headers, entry.payload).into_response()
}

/// Handler for DELETE /cache/:key
///
/// Deleting an absent key succeeds.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    validate_key(&key)?;
    if !state.coordinator.delete(&key).await {
        return Err(CacheError::Storage(format!("failed to delete '{}'", key)));
    }
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let stats = state.coordinator.stats().await?;
    Ok(Json(StatsResponse::new(
        &stats,
        state.coordinator.max_size_bytes(),
    )))
}

/// Handler for POST /sweep
///
/// The body is optional; missing bounds use the configured budget and TTL.
/// A body that is present but malformed is rejected without sweeping.
pub async fn sweep_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SweepResponse>> {
    let request = SweepRequest::from_body(&body)?;
    let max_size = request
        .max_size_bytes
        .unwrap_or(state.coordinator.max_size_bytes());
    let max_age = request.max_age_ms.unwrap_or(state.coordinator.ttl_ms());

    let outcome = state.coordinator.sweep_outcome(max_size, max_age).await?;
    Ok(Json(outcome.into()))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    if !state.coordinator.clear().await {
        return Err(CacheError::Storage("failed to clear cache".to_string()));
    }
    Ok(Json(ClearResponse::cleared()))
}

/// Handler for GET /memory
pub async fn memory_handler(State(state): State<AppState>) -> Json<MemoryStatus> {
    Json(state.monitor.status())
}

/// Handler for POST /memory/check
///
/// Signals a resume from suspension; the monitor samples right away.
pub async fn memory_check_handler(State(state): State<AppState>) -> Json<MemoryCheckResponse> {
    let check_requested = state.monitor.notify_resume();
    Json(MemoryCheckResponse {
        check_requested,
        status: state.monitor.status(),
    })
}

/// Handler for POST /memory/cleanup
///
/// Runs the pressure callbacks with the requested urgency, whatever the
/// current sample says.
pub async fn memory_cleanup_handler(
    State(state): State<AppState>,
    Json(request): Json<MemoryCleanupRequest>,
) -> Json<MemoryCleanupResponse> {
    let callbacks = state.monitor.cleanup_now(request.urgency);
    Json(MemoryCleanupResponse {
        urgency: request.urgency,
        callbacks,
    })
}

// == Metadata ==

fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CacheError::InvalidRequest(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Handler for POST /metadata/studies
pub async fn put_study_handler(
    State(state): State<AppState>,
    Json(study): Json<Study>,
) -> Result<Json<MetadataWriteResponse>> {
    require_id("study_uid", &study.study_uid)?;
    let id = study.study_uid.clone();
    state.metadata.insert_study(study)?;
    Ok(Json(MetadataWriteResponse::new(Collection::Studies, id)))
}

/// Handler for POST /metadata/series
pub async fn put_series_handler(
    State(state): State<AppState>,
    Json(series): Json<Series>,
) -> Result<Json<MetadataWriteResponse>> {
    require_id("series_uid", &series.series_uid)?;
    require_id("study_uid", &series.study_uid)?;
    let id = series.series_uid.clone();
    state.metadata.insert_series(series)?;
    Ok(Json(MetadataWriteResponse::new(Collection::Series, id)))
}

/// Handler for POST /metadata/instances
pub async fn put_instance_handler(
    State(state): State<AppState>,
    Json(instance): Json<Instance>,
) -> Result<Json<MetadataWriteResponse>> {
    require_id("sop_uid", &instance.sop_uid)?;
    require_id("series_uid", &instance.series_uid)?;
    let id = instance.sop_uid.clone();
    state.metadata.insert_instance(instance)?;
    Ok(Json(MetadataWriteResponse::new(Collection::Instances, id)))
}

/// Handler for POST /metadata/sessions
///
/// Posting an existing session id refreshes its activity time.
pub async fn put_session_handler(
    State(state): State<AppState>,
    Json(session): Json<UserSession>,
) -> Result<Json<MetadataWriteResponse>> {
    require_id("session_id", &session.session_id)?;
    let id = session.session_id.clone();
    state.metadata.insert_session(session)?;
    Ok(Json(MetadataWriteResponse::new(Collection::UserSessions, id)))
}

/// Handler for GET /metadata
pub async fn metadata_counts_handler(
    State(state): State<AppState>,
) -> Result<Json<MetadataCountsResponse>> {
    let store = &state.metadata;
    Ok(Json(MetadataCountsResponse {
        studies: store.count(Collection::Studies)?,
        series: store.count(Collection::Series)?,
        instances: store.count(Collection::Instances)?,
        user_sessions: store.count(Collection::UserSessions)?,
    }))
}

/// Handler for POST /metadata/sweep
///
/// Runs one orphan sweep now, outside the regular schedule.
pub async fn metadata_sweep_handler(State(state): State<AppState>) -> Json<OrphanSweepReport> {
    Json(state.sweeper.sweep().await)
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
