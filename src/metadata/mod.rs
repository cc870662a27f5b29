//! Metadata Module
//!
//! Server-side hygiene for the study/series/instance hierarchy: record
//! types, the persistence collaborator and the orphan sweeper.

mod model;
mod store;
mod sweeper;

pub use model::{
    Collection, Field, Instance, MetadataRecord, Predicate, Series, Study, UserSession,
};
pub use store::{InMemoryMetadataStore, MetadataStore};
pub use sweeper::{OrphanSweepReport, OrphanSweeper, PassOutcome};
