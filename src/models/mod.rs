//! Request and Response models for the cache server API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{
    metadata_from_headers, MemoryCleanupRequest, SweepRequest, META_HEADER_PREFIX,
};
pub use responses::{
    ClearResponse, DeleteResponse, HealthResponse, MemoryCheckResponse, MemoryCleanupResponse,
    MetadataCountsResponse, MetadataWriteResponse, PutResponse, StatsResponse, SweepResponse,
};
