//! notes-core: shared library for the durable note persistence core.
//!
//! This crate provides:
//! - The `FileSystem` trait abstraction and an in-memory test double
//! - The document/sidecar metadata model (§3)
//! - The write-ahead log
//! - The atomic content+metadata writer
//! - The shared `CoreError` taxonomy
//! - Runtime configuration (§6)

pub mod atomic;
pub mod config;
pub mod document;
pub mod error;
pub mod fs;
pub mod wal;

pub use atomic::{AtomicMetrics, AtomicSaveResult, AtomicWriter, LegacySave};
pub use config::{ConfigError, NotesConfig};
pub use document::{sidecar_path_for, Document, SidecarMetadata};
pub use error::CoreError;
pub use fs::{walk_recursive, DirEntry, FileSystem, FsError, InMemoryFs};
pub use wal::{WalRecord, WriteAheadLog, DEFAULT_FLUSH_INTERVAL_SECS};
