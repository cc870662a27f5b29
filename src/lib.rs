//! Pixel Cache - a bounded content cache for medical image pixel data
//!
//! Size- and age-bounded eviction over a persistent blob store, memory
//! pressure driven cleanup, and orphan sweeping for the study/series/
//! instance metadata hierarchy.

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use coordinator::CacheCoordinator;
pub use error::CacheError;
