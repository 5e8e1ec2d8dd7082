//! Save Coordinator: per-path exclusivity, retry/backoff, watcher
//! suppression, and batch save orchestration in front of the atomic writer.

use crate::status::SaveStatus;
use crate::watcher::FileWatcher;
use futures::future::join_all;
use notes_core::atomic::{AtomicMetrics, AtomicWriter, LegacySave};
use notes_core::fs::FileSystem;
use notes_core::wal::WriteAheadLog;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use uuid::Uuid;

pub const DEFAULT_RETRY_DELAYS_MS: [u64; 3] = [100, 500, 1500];
pub const DEFAULT_WATCHER_RESUME_DELAY: Duration = Duration::from_millis(750);
pub const DEFAULT_BATCH_CONCURRENCY_LIMIT: usize = 3;
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone)]
pub struct SaveStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
}

#[derive(Debug, Clone)]
pub struct BatchSaveOp {
    pub document_id: Uuid,
    pub path: PathBuf,
    pub title: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSaveSummary {
    pub success_count: usize,
    pub failure_count: usize,
    pub failed_items: Vec<PathBuf>,
}

/// `(completed, total)` progress, reported once per item as a batch save
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSaveProgress {
    pub completed: usize,
    pub total: usize,
}

/// A caller-supplied, retryable save action, used by `safe_save_with_retry`
/// for callers that don't need the atomic content+metadata path (e.g.
/// config writes).
pub type SaveAction =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Per-path coordination record: waiters clone the receiver and observe the
/// leader's result once, instead of racing a second save for the same path.
struct InFlight {
    result: watch::Receiver<Option<bool>>,
}

pub struct SaveCoordinator<F: FileSystem> {
    atomic_writer: AtomicWriter<F>,
    wal: Option<Arc<WriteAheadLog<F>>>,
    watcher: Option<Arc<FileWatcher>>,
    retry_delays: Vec<Duration>,
    watcher_resume_delay: Duration,
    batch_semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    leaders: Mutex<HashMap<String, watch::Sender<Option<bool>>>>,
    in_flight_count: AtomicU64,
    stats: Mutex<SaveStats>,
    status_tx: Option<mpsc::UnboundedSender<SaveStatus>>,
}

impl<F: FileSystem> SaveCoordinator<F> {
    pub fn new(fs: Arc<F>, watcher: Option<Arc<FileWatcher>>) -> Self {
        Self {
            atomic_writer: AtomicWriter::new(fs),
            wal: None,
            watcher,
            retry_delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            watcher_resume_delay: DEFAULT_WATCHER_RESUME_DELAY,
            batch_semaphore: Arc::new(Semaphore::new(DEFAULT_BATCH_CONCURRENCY_LIMIT)),
            in_flight: Mutex::new(HashMap::new()),
            leaders: Mutex::new(HashMap::new()),
            in_flight_count: AtomicU64::new(0),
            stats: Mutex::new(SaveStats::default()),
            status_tx: None,
        }
    }

    /// Wires the write-ahead log so a successful `safe_save_with_metadata`
    /// obsoletes that document's pending WAL entry instead of leaving it
    /// for the next blanket flush cycle to sort out.
    pub fn with_wal(mut self, wal: Arc<WriteAheadLog<F>>) -> Self {
        self.wal = Some(wal);
        self
    }

    pub fn with_status_channel(mut self, tx: mpsc::UnboundedSender<SaveStatus>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    fn emit(&self, status: SaveStatus) {
        if let Some(tx) = &self.status_tx {
            let _ = tx.send(status);
        }
    }

    fn normalize(path: &Path) -> String {
        path.to_string_lossy().to_lowercase()
    }

    /// Runs `save_action` with the coordinator's retry/suppression policy,
    /// coalescing concurrent calls for the same normalized path.
    pub async fn safe_save_with_retry(&self, save_action: &SaveAction, path: &Path, title: &str) -> bool {
        self.run_with_retry(path, title, || save_action()).await
    }

    /// Atomic content+metadata save via the atomic writer, with the same exclusivity,
    /// retry, and watcher-suppression contract as `safe_save_with_retry`.
    pub async fn safe_save_with_metadata(
        &self,
        document_id: Uuid,
        path: &Path,
        content: &[u8],
        legacy_save: &LegacySave,
        title: &str,
    ) -> bool {
        let success = self
            .run_with_retry(path, title, move || {
                Box::pin(async move {
                    let result = self
                        .atomic_writer
                        .save_atomically(document_id, path, content, legacy_save)
                        .await;
                    if result.success {
                        Ok(())
                    } else {
                        Err(result.error.unwrap_or_else(|| "atomic save failed".to_string()))
                    }
                })
            })
            .await;

        if success {
            if let Some(wal) = &self.wal {
                if let Err(e) = wal.remove(document_id).await {
                    tracing::warn!("failed to obsolete WAL entry for {document_id}: {e}");
                }
            }
        }

        success
    }

    /// Core per-path-exclusive retry loop, shared by both public save entry
    /// points. `action` is called fresh on every attempt.
    async fn run_with_retry<'a, Fut>(&'a self, path: &Path, _title: &str, action: impl Fn() -> Fut) -> bool
    where
        Fut: Future<Output = Result<(), String>> + 'a,
    {
        let key = Self::normalize(path);

        let leader_rx = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(&key) {
                Some(existing.result.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                in_flight.insert(key.clone(), InFlight { result: rx });
                self.leaders.lock().await.insert(key.clone(), tx);
                self.in_flight_count.fetch_add(1, Ordering::SeqCst);
                None
            }
        };

        if let Some(rx) = leader_rx {
            return Self::await_leader_result(rx).await;
        }

        self.suspend_watcher(path);
        self.emit(SaveStatus::InProgress { path: path.to_path_buf() });
        {
            let mut stats = self.stats.lock().await;
            stats.attempts += 1;
        }

        let mut success = false;
        let max_attempt = self.retry_delays.len();
        for (attempt, delay) in std::iter::once(None)
            .chain(self.retry_delays.iter().cloned().map(Some))
            .enumerate()
        {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
                let mut stats = self.stats.lock().await;
                stats.retries += 1;
            }
            match action().await {
                Ok(()) => {
                    success = true;
                    break;
                }
                Err(e) => {
                    let is_final = attempt == max_attempt;
                    tracing::warn!("save attempt {} failed for {}: {e}", attempt + 1, path.display());
                    if !is_final {
                        self.emit(SaveStatus::Failure { path: path.to_path_buf(), retrying: true });
                    }
                }
            }
        }

        {
            let mut stats = self.stats.lock().await;
            if success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
        }

        self.emit(if success {
            SaveStatus::Success { path: path.to_path_buf() }
        } else {
            SaveStatus::Failure { path: path.to_path_buf(), retrying: false }
        });

        self.finish_leader(&key, success).await;
        self.schedule_watcher_resume(path.to_path_buf());

        success
    }

    /// Saves every op with up to `DEFAULT_BATCH_CONCURRENCY_LIMIT` in flight
    /// at once, reporting `(completed, total)` after each one finishes.
    /// Order of completion is not the order of `ops`.
    pub async fn safe_batch_save(
        &self,
        ops: Vec<BatchSaveOp>,
        progress_tx: Option<mpsc::UnboundedSender<BatchSaveProgress>>,
    ) -> BatchSaveSummary {
        let total = ops.len();
        let completed = Arc::new(AtomicU64::new(0));

        let tasks = ops.into_iter().map(|op| {
            let completed = Arc::clone(&completed);
            let progress_tx = progress_tx.clone();
            let semaphore = Arc::clone(&self.batch_semaphore);
            async move {
                let _permit = semaphore.acquire().await.unwrap();
                let legacy = no_legacy_fallback();
                let result = self
                    .atomic_writer
                    .save_atomically(op.document_id, &op.path, &op.content, &legacy)
                    .await;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(tx) = &progress_tx {
                    let _ = tx.send(BatchSaveProgress { completed: done as usize, total });
                }

                (op.path, result.success)
            }
        });

        let results = join_all(tasks).await;

        let mut summary = BatchSaveSummary::default();
        for (path, success) in results {
            if success {
                summary.success_count += 1;
            } else {
                summary.failure_count += 1;
                summary.failed_items.push(path);
            }
        }
        summary
    }

    pub async fn get_stats(&self) -> SaveStats {
        self.stats.lock().await.clone()
    }

    pub fn get_atomic_metrics(&self) -> AtomicMetrics {
        self.atomic_writer.metrics()
    }

    /// Waits up to `SHUTDOWN_DRAIN_TIMEOUT` for in-flight saves to finish.
    pub async fn dispose(&self) {
        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while self.in_flight_count.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("save coordinator dispose timed out with saves still in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn suspend_watcher(&self, path: &Path) {
        if let Some(watcher) = &self.watcher {
            watcher.suspend(path);
        }
    }

    fn schedule_watcher_resume(&self, path: PathBuf) {
        let Some(watcher) = self.watcher.clone() else { return };
        let delay = self.watcher_resume_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            watcher.resume(&path);
        });
    }

    async fn finish_leader(&self, key: &str, success: bool) {
        if let Some(tx) = self.leaders.lock().await.remove(key) {
            let _ = tx.send(Some(success));
        }
        self.in_flight.lock().await.remove(key);
        self.in_flight_count.fetch_sub(1, Ordering::SeqCst);
    }

    async fn await_leader_result(mut rx: watch::Receiver<Option<bool>>) -> bool {
        loop {
            if let Some(result) = *rx.borrow() {
                return result;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }
}

fn no_legacy_fallback() -> LegacySave {
    Box::new(|| Box::pin(async { Err("no legacy fallback configured for batch save".to_string()) }))
}
