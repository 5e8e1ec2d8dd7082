//! Write-ahead log: a crash-recovery safety net that sits in front of
//! the atomic writer. Every save appends a framed record before the atomic
//! content+metadata write is attempted; on clean shutdown the log for a
//! document is truncated. On startup, any record still present means the
//! prior write may not have completed and startup recovery should reconcile it.
//!
//! Entries are appended to a single per-vault log file, one `bincode`-framed
//! record per document write. Replay keeps only the latest record per
//! `document_id` ("latest-wins"), mirroring the atomic writer's own
//! last-write-wins semantics.

use crate::error::CoreError;
use crate::fs::FileSystem;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default cadence for the scheduler's WAL-flush timer.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    pub document_id: Uuid,
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub sequence: u64,
}

/// Append-only log of pending writes, keyed by document for latest-wins replay.
pub struct WriteAheadLog<F: FileSystem> {
    fs: Arc<F>,
    log_path: PathBuf,
    sequence: AtomicU64,
    // Serializes append/truncate so concurrent saves don't interleave frames.
    write_lock: Mutex<()>,
}

impl<F: FileSystem> WriteAheadLog<F> {
    pub fn new(fs: Arc<F>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            log_path: log_path.into(),
            sequence: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Appends a record for `document_id`/`path`/`content`. The record is
    /// durable on return: the underlying write targets the log file
    /// directly (no temp-file indirection; losing the tail of an append
    /// log on crash just means losing the pending record, which recovery
    /// treats the same as "no WAL entry").
    pub async fn append(
        &self,
        document_id: Uuid,
        path: &Path,
        content: &[u8],
    ) -> Result<u64, CoreError> {
        let _guard = self.write_lock.lock().await;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let record = WalRecord {
            document_id,
            path: path.to_path_buf(),
            content: content.to_vec(),
            sequence,
        };

        let mut frame = bincode::serialize(&record)
            .map_err(|e| CoreError::Integrity(format!("WAL encode failed: {e}")))?;
        let len = (frame.len() as u32).to_le_bytes();

        let mut existing = match self.fs.read_bytes(&self.log_path).await {
            Ok(bytes) => bytes,
            Err(_) => Vec::new(),
        };
        existing.extend_from_slice(&len);
        existing.append(&mut frame);

        self.fs
            .write_bytes(&self.log_path, &existing)
            .await
            .map_err(CoreError::from)?;

        Ok(sequence)
    }

    /// Replays the log and returns the latest record per document, in the
    /// order those documents last appeared. Malformed trailing bytes (a
    /// length-prefixed frame truncated mid-write by a crash) are treated as
    /// the end of the usable log rather than a hard integrity error.
    pub async fn replay(&self) -> Result<Vec<WalRecord>, CoreError> {
        let bytes = match self.fs.read_bytes(&self.log_path).await {
            Ok(b) => b,
            Err(_) => return Ok(Vec::new()),
        };

        let mut latest: HashMap<Uuid, WalRecord> = HashMap::new();
        let mut order: Vec<Uuid> = Vec::new();
        let mut cursor = 0usize;

        while cursor + 4 <= bytes.len() {
            let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if cursor + len > bytes.len() {
                tracing::warn!("WAL truncated mid-record at byte {cursor}; stopping replay");
                break;
            }
            let frame = &bytes[cursor..cursor + len];
            cursor += len;

            match bincode::deserialize::<WalRecord>(frame) {
                Ok(record) => {
                    if !latest.contains_key(&record.document_id) {
                        order.push(record.document_id);
                    }
                    latest.insert(record.document_id, record);
                }
                Err(e) => {
                    tracing::warn!("WAL record at byte {cursor} failed to decode: {e}; stopping replay");
                    break;
                }
            }
        }

        Ok(order.into_iter().filter_map(|id| latest.remove(&id)).collect())
    }

    /// Clears the log entirely. Called after a successful flush cycle once
    /// every pending record has been durably written by the atomic writer.
    pub async fn truncate(&self) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        if self.fs.exists(&self.log_path).await.map_err(CoreError::from)? {
            self.fs.delete(&self.log_path).await.map_err(CoreError::from)?;
        }
        Ok(())
    }

    /// Removes every pending record for `document_id`, rewriting the log in
    /// place. Called right after that document's content is durably written
    /// by the atomic writer, so a crash before the next blanket flush cycle
    /// doesn't replay content that's already safely on disk.
    pub async fn remove(&self, document_id: Uuid) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let bytes = match self.fs.read_bytes(&self.log_path).await {
            Ok(b) => b,
            Err(_) => return Ok(()),
        };

        let mut rebuilt = Vec::with_capacity(bytes.len());
        let mut cursor = 0usize;
        while cursor + 4 <= bytes.len() {
            let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            let frame_start = cursor + 4;
            if frame_start + len > bytes.len() {
                break;
            }
            let frame = &bytes[frame_start..frame_start + len];
            let keep = match bincode::deserialize::<WalRecord>(frame) {
                Ok(record) => record.document_id != document_id,
                Err(_) => break,
            };
            if keep {
                rebuilt.extend_from_slice(&bytes[cursor..frame_start + len]);
            }
            cursor = frame_start + len;
        }

        if rebuilt.is_empty() {
            if self.fs.exists(&self.log_path).await.map_err(CoreError::from)? {
                self.fs.delete(&self.log_path).await.map_err(CoreError::from)?;
            }
        } else {
            self.fs
                .write_bytes(&self.log_path, &rebuilt)
                .await
                .map_err(CoreError::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;

    #[tokio::test]
    async fn append_and_replay_latest_wins() {
        let fs = Arc::new(InMemoryFs::new());
        let wal = WriteAheadLog::new(fs, "/vault/.notes/wal.log");

        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();

        wal.append(doc_a, Path::new("/vault/a.rtf"), b"v1").await.unwrap();
        wal.append(doc_b, Path::new("/vault/b.rtf"), b"v1").await.unwrap();
        wal.append(doc_a, Path::new("/vault/a.rtf"), b"v2").await.unwrap();

        let records = wal.replay().await.unwrap();
        assert_eq!(records.len(), 2);
        let a_record = records.iter().find(|r| r.document_id == doc_a).unwrap();
        assert_eq!(a_record.content, b"v2");
    }

    #[tokio::test]
    async fn truncate_clears_log() {
        let fs = Arc::new(InMemoryFs::new());
        let wal = WriteAheadLog::new(fs, "/vault/.notes/wal.log");

        wal.append(Uuid::new_v4(), Path::new("/vault/a.rtf"), b"v1")
            .await
            .unwrap();
        wal.truncate().await.unwrap();

        assert!(wal.replay().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_drops_only_the_named_document() {
        let fs = Arc::new(InMemoryFs::new());
        let wal = WriteAheadLog::new(fs, "/vault/.notes/wal.log");

        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        wal.append(doc_a, Path::new("/vault/a.rtf"), b"a").await.unwrap();
        wal.append(doc_b, Path::new("/vault/b.rtf"), b"b").await.unwrap();

        wal.remove(doc_a).await.unwrap();

        let records = wal.replay().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].document_id, doc_b);
    }

    #[tokio::test]
    async fn remove_last_document_clears_the_log_file() {
        let fs = Arc::new(InMemoryFs::new());
        let wal = WriteAheadLog::new(Arc::clone(&fs), "/vault/.notes/wal.log");

        let doc = Uuid::new_v4();
        wal.append(doc, Path::new("/vault/a.rtf"), b"a").await.unwrap();
        wal.remove(doc).await.unwrap();

        assert!(!fs.exists(Path::new("/vault/.notes/wal.log")).await.unwrap());
    }

    #[tokio::test]
    async fn replay_stops_cleanly_at_truncated_tail() {
        let fs = Arc::new(InMemoryFs::new());
        let wal = WriteAheadLog::new(Arc::clone(&fs), "/vault/.notes/wal.log");

        let doc = Uuid::new_v4();
        wal.append(doc, Path::new("/vault/a.rtf"), b"ok").await.unwrap();

        // Simulate a crash mid-append: corrupt the length prefix of a second,
        // never-fully-written record appended directly to the backing store.
        let mut bytes = fs.read_bytes(Path::new("/vault/.notes/wal.log")).await.unwrap();
        bytes.extend_from_slice(&999_999u32.to_le_bytes());
        fs.write_bytes(Path::new("/vault/.notes/wal.log"), &bytes)
            .await
            .unwrap();

        let records = wal.replay().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].document_id, doc);
    }
}
