//! Request DTOs for the cache server API
//!
//! Defines incoming request bodies and how entry metadata is read from
//! request headers.

use axum::http::HeaderMap;
use serde::Deserialize;

use crate::cache::EntryMetadata;
use crate::error::{CacheError, Result};
use crate::memory::Urgency;

/// Headers with this prefix are stored as entry metadata, e.g.
/// `x-cache-meta-modality: CT` becomes `modality = CT`.
pub const META_HEADER_PREFIX: &str = "x-cache-meta-";

/// Request body for POST /sweep. Missing bounds fall back to the
/// configured size budget and TTL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepRequest {
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
    #[serde(default)]
    pub max_age_ms: Option<u64>,
}

impl SweepRequest {
    /// Parses an optional JSON body. An empty body means "use the
    /// defaults"; anything else must be a valid request.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| CacheError::InvalidRequest(format!("invalid sweep request: {}", e)))
    }
}

/// Request body for POST /memory/cleanup
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryCleanupRequest {
    pub urgency: Urgency,
}

/// Collects `x-cache-meta-*` headers into entry metadata. Values that are
/// not valid UTF-8 are skipped.
pub fn metadata_from_headers(headers: &HeaderMap) -> EntryMetadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let field = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
            if field.is_empty() {
                return None;
            }
            let value = value.to_str().ok()?;
            Some((field.to_string(), value.to_string()))
        })
        .collect()
}
