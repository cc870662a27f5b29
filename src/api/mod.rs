//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /cache/:key` - Store a payload
//! - `GET /cache/:key` - Retrieve a payload
//! - `DELETE /cache/:key` - Delete a key
//! - `GET /stats` - Cache statistics
//! - `POST /sweep` - Run an eviction sweep
//! - `POST /clear` - Remove every entry
//! - `GET /memory` - Memory monitor status
//! - `POST /memory/check`, `POST /memory/cleanup` - Manual monitor triggers
//! - `GET /metadata`, `POST /metadata/*` - Study/series/instance/session
//!   records and on-demand orphan sweep
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
