//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, get_handler, health_handler, memory_check_handler,
    memory_cleanup_handler, memory_handler, metadata_counts_handler, metadata_sweep_handler,
    put_handler, put_instance_handler, put_series_handler, put_session_handler,
    put_study_handler, stats_handler, sweep_handler, AppState,
};

/// Largest accepted payload. Pixel data for a single frame can run to
/// hundreds of megabytes.
const MAX_BODY_BYTES: usize = 1024 * 1024 * 1024;

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /cache/:key` - Store a payload (raw body, `x-cache-meta-*` headers)
/// - `GET /cache/:key` - Retrieve a payload
/// - `DELETE /cache/:key` - Delete a key
/// - `GET /stats` - Size statistics and budget usage
/// - `POST /sweep` - Run an eviction sweep
/// - `POST /clear` - Remove every entry
/// - `GET /memory` - Memory monitor status
/// - `POST /memory/check` - Resume signal, samples memory right away
/// - `POST /memory/cleanup` - Run pressure callbacks with a given urgency
/// - `GET /metadata` - Record counts per collection
/// - `POST /metadata/{studies,series,instances,sessions}` - Upsert a record
/// - `POST /metadata/sweep` - Run an orphan sweep now
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route(
            "/cache/:key",
            get(get_handler).put(put_handler).delete(delete_handler),
        )
        .route("/stats", get(stats_handler))
        .route("/sweep", post(sweep_handler))
        .route("/clear", post(clear_handler))
        .route("/memory", get(memory_handler))
        .route("/memory/check", post(memory_check_handler))
        .route("/memory/cleanup", post(memory_cleanup_handler))
        .route("/metadata", get(metadata_counts_handler))
        .route("/metadata/studies", post(put_study_handler))
        .route("/metadata/series", post(put_series_handler))
        .route("/metadata/instances", post(put_instance_handler))
        .route("/metadata/sessions", post(put_session_handler))
        .route("/metadata/sweep", post(metadata_sweep_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::coordinator::CacheCoordinator;
    use crate::memory::{FixedSampler, MemoryMonitor, PressureThresholds};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let coordinator = CacheCoordinator::new(Arc::new(CacheStore::in_memory()), 1000, 1000);
        let monitor = MemoryMonitor::new(
            Arc::new(FixedSampler::unsupported()),
            PressureThresholds::default(),
            Duration::from_secs(10),
            false,
        );
        create_router(AppState::new(coordinator, monitor))
    }

    async fn status_of(app: Router, method: &str, uri: &str) -> StatusCode {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/stats").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_memory_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/memory").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_memory_check_endpoint() {
        assert_eq!(
            status_of(create_test_app(), "POST", "/memory/check").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_metadata_endpoints() {
        assert_eq!(status_of(create_test_app(), "GET", "/metadata").await, StatusCode::OK);
        assert_eq!(
            status_of(create_test_app(), "POST", "/metadata/sweep").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_put_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/cache/test")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        assert_eq!(
            status_of(create_test_app(), "GET", "/cache/nonexistent").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_sweep_without_body() {
        assert_eq!(status_of(create_test_app(), "POST", "/sweep").await, StatusCode::OK);
    }
}
