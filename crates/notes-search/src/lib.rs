//! notes-search: the full-text search projection, a tantivy-backed
//! index, its ranking/preview helpers, and the index manager that keeps it
//! synchronized with the file system.

pub mod extraction;
pub mod index_manager;
pub mod preview;
pub mod ranking;
pub mod repository;
pub mod schema;

pub use extraction::plaintext_from_bytes;
pub use index_manager::{
    EligibilityConfig, FileEventKind, IndexAction, IndexManager, RebuildProgress, RebuildStage,
    DEFAULT_DEBOUNCE_MS,
};
pub use preview::{PreviewCache, DEFAULT_MAX_PREVIEW_LEN};
pub use ranking::{RankedHit, SortOrder};
pub use repository::{FtsError, FtsRepository, NoteDocument, SearchOptions};
pub use schema::NoteFields;
