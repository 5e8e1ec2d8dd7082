//! Shared error taxonomy: a sum type instead of stringly-typed exception
//! dispatch, so retry/report decisions switch on a finite set of variants
//! rather than inspecting messages.

use crate::fs::FsError;
use thiserror::Error;

/// Cross-cutting error classification used by the save coordinator's retry
/// loop, the projection runtime's resilient replay, and the status-reporting
/// surface.
#[derive(Debug, Error)]
pub enum CoreError {
    /// File locked, share violation, temporary unavailability. Retried by
    /// the save coordinator.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Path invalid, volume missing, quota exceeded. Still retried three
    /// times by the save coordinator (the watcher may be holding a handle),
    /// then surfaced.
    #[error("permanent I/O error: {0}")]
    PermanentIo(String),

    /// Sidecar JSON malformed, WAL record truncated, event deserialization
    /// failure. A minimum-viable substitute is synthesized and progress is
    /// preserved.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Event-store append lost an optimistic-concurrency race; caller
    /// retries with a refreshed expected version.
    #[error("concurrency conflict: expected version {expected}, actual {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    /// Shutdown or user cancellation requested mid-operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<FsError> for CoreError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(_) | FsError::NotDirectory(_) => CoreError::PermanentIo(e.to_string()),
            FsError::AlreadyExists(_) => CoreError::TransientIo(e.to_string()),
            FsError::Io { ref source, .. } => classify_io(source, &e),
        }
    }
}

fn classify_io(source: &std::io::Error, full: &FsError) -> CoreError {
    use std::io::ErrorKind::*;
    match source.kind() {
        PermissionDenied | InvalidInput | InvalidData | NotFound => {
            CoreError::PermanentIo(full.to_string())
        }
        _ => CoreError::TransientIo(full.to_string()),
    }
}

impl CoreError {
    /// Whether the save coordinator's retry loop should attempt this again.
    /// Retries on all of `TransientIo`/`PermanentIo`/`Integrity` and only
    /// short-circuits on `Cancelled`.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, CoreError::Cancelled)
    }
}
