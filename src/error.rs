//! Error types for the pixel cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache, monitor and sweeper layers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Backend storage failed for a reason other than plain I/O
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filesystem I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry header could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Operation attempted on a closed store
    #[error("Cache store is closed")]
    Closed,

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata collaborator failure
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Storage(_)
            | CacheError::Io(_)
            | CacheError::Encoding(_)
            | CacheError::Config(_)
            | CacheError::Metadata(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
