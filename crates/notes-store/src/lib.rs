//! notes-store: the event-sourced read side of the notes persistence core.
//!
//! Houses the append-only event store, the projection runtime that
//! drives read models forward from it, and the tree/tag projections
//! themselves. The full-text search projection lives in the sibling
//! `notes-search` crate since it's backed by a different engine (tantivy)
//! rather than SQLite.

pub mod event;
pub mod event_store;
pub mod projection;
pub mod projections;

pub use event::{DomainEvent, EntityType, StoredEvent, TagAssignment};
pub use event_store::{EventStore, EventStoreError};
pub use projection::{Projection, ProjectionOrchestrator, ProjectionStatus};
pub use projections::{TagProjection, TreeProjection, TreeRow};
