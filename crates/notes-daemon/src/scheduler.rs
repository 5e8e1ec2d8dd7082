//! Central Save Scheduler: periodic auto-save and WAL-flush timers,
//! each guarded by a non-reentrant try-acquire so a slow tick never overlaps
//! the next one.
//!
//! Both ticks are expressed as caller-supplied tasks rather than baked-in
//! filesystem calls: auto-save iterates whatever in-memory documents the
//! host process holds, and WAL-flush reconciles the on-disk log (appending
//! current content for anything dirty, obsoleting entries already covered
//! by a successful atomic write); the scheduler only owns the cadence and
//! the non-reentrancy guard, not the policy.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_WAL_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Runs on every auto-save tick; boxed so the scheduler doesn't need to know
/// about `SaveCoordinator`'s generic filesystem type.
pub type SaveAllTask = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Runs on every WAL-flush tick: appends current in-memory content for
/// dirty documents and reconciles/obsoletes entries already covered by a
/// successful save. Never a blind full-log wipe.
pub type WalFlushTask = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct CentralScheduler {
    save_all: SaveAllTask,
    wal_flush: WalFlushTask,
    auto_save_interval: Duration,
    wal_flush_interval: Duration,
    auto_save_lock: Arc<Semaphore>,
    wal_flush_lock: Arc<Semaphore>,
}

impl CentralScheduler {
    pub fn new(save_all: SaveAllTask, wal_flush: WalFlushTask) -> Self {
        Self {
            save_all,
            wal_flush,
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
            wal_flush_interval: DEFAULT_WAL_FLUSH_INTERVAL,
            auto_save_lock: Arc::new(Semaphore::new(1)),
            wal_flush_lock: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn with_intervals(mut self, auto_save: Duration, wal_flush: Duration) -> Self {
        self.auto_save_interval = auto_save;
        self.wal_flush_interval = wal_flush;
        self
    }

    /// Runs both timers until `cancellation` fires. Each tick that finds its
    /// semaphore already held (previous tick still running) is skipped
    /// rather than queued.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let auto_save = {
            let this = Arc::clone(&self);
            let cancellation = cancellation.clone();
            tokio::spawn(async move { this.auto_save_loop(cancellation).await })
        };
        let wal_flush = {
            let this = Arc::clone(&self);
            let cancellation = cancellation.clone();
            tokio::spawn(async move { this.wal_flush_loop(cancellation).await })
        };

        let _ = tokio::join!(auto_save, wal_flush);
    }

    async fn auto_save_loop(&self, cancellation: CancellationToken) {
        let mut ticker = tokio::time::interval(self.auto_save_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => self.try_auto_save().await,
            }
        }
    }

    async fn wal_flush_loop(&self, cancellation: CancellationToken) {
        let mut ticker = tokio::time::interval(self.wal_flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => self.try_wal_flush().await,
            }
        }
    }

    async fn try_auto_save(&self) {
        let permit = match tokio::time::timeout(ACQUIRE_TIMEOUT, self.auto_save_lock.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                tracing::debug!("auto-save tick skipped: previous tick still running");
                return;
            }
        };
        (self.save_all)().await;
        drop(permit);
    }

    async fn try_wal_flush(&self) {
        let permit = match tokio::time::timeout(ACQUIRE_TIMEOUT, self.wal_flush_lock.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                tracing::debug!("wal-flush tick skipped: previous tick still running");
                return;
            }
        };
        (self.wal_flush)().await;
        drop(permit);
    }

    /// Forces an out-of-cycle save, used during graceful shutdown.
    pub async fn save_all_async(&self) {
        self.try_auto_save().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(calls: Arc<AtomicUsize>) -> SaveAllTask {
        Box::new(move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    fn noop_task() -> WalFlushTask {
        Box::new(|| Box::pin(async {}))
    }

    #[tokio::test]
    async fn save_all_async_invokes_task() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = CentralScheduler::new(counting_task(Arc::clone(&calls)), noop_task());
        scheduler.save_all_async().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlapping_ticks_are_skipped_not_queued() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let task: SaveAllTask = Box::new(move || {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
            })
        });

        let scheduler = Arc::new(CentralScheduler::new(task, noop_task()));
        let s1 = Arc::clone(&scheduler);
        let s2 = Arc::clone(&scheduler);

        let h1 = tokio::spawn(async move { s1.try_auto_save().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let h2 = tokio::spawn(async move { s2.try_auto_save().await });

        let _ = tokio::join!(h1, h2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wal_flush_task_runs_on_save_all_sibling_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let wal_flush: WalFlushTask = Box::new(move || {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        let scheduler = CentralScheduler::new(counting_task(Arc::new(AtomicUsize::new(0))), wal_flush);
        scheduler.try_wal_flush().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
