//! Projection Runtime: drives read-model projections forward from the
//! event store, with catch-up, rebuild, and a continuous polling loop.

use crate::event::StoredEvent;
use crate::event_store::EventStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const CATCH_UP_BATCH_SIZE: i64 = 1000;
const CONTINUOUS_POLL_INTERVAL_SECS: u64 = 5;

/// A read-model projection driven by the ordered event stream.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &str;

    /// Applies a single event to the projection's backing store. Errors are
    /// logged by the orchestrator and the event is skipped (resilient
    /// replay) rather than blocking the whole catch-up pass.
    async fn handle(&self, event: &StoredEvent) -> Result<(), String>;

    /// Clears all of this projection's backing data, in preparation for a
    /// full rebuild from position 0.
    async fn clear(&self) -> Result<(), String>;

    async fn get_last_processed_position(&self) -> Result<i64, String>;

    async fn set_last_processed_position(&self, position: i64) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct ProjectionStatus {
    pub name: String,
    pub last: i64,
    pub current: i64,
    pub lag: i64,
    pub up_to_date: bool,
}

/// Coordinates one or more projections against a shared event store. A
/// single mutex serializes catch-up and rebuild passes so a rebuild never
/// races a concurrent catch-up over the same projection's backing tables.
pub struct ProjectionOrchestrator {
    store: Arc<EventStore>,
    projections: Vec<Arc<dyn Projection>>,
    lock: Mutex<()>,
}

impl ProjectionOrchestrator {
    pub fn new(store: Arc<EventStore>, projections: Vec<Arc<dyn Projection>>) -> Self {
        Self {
            store,
            projections,
            lock: Mutex::new(()),
        }
    }

    /// For each projection, reads events after its checkpoint in batches of
    /// 1000, applying and checkpointing after each batch.
    pub async fn catch_up_all(&self) {
        let _guard = self.lock.lock().await;
        for projection in &self.projections {
            self.catch_up_one(projection.as_ref()).await;
        }
    }

    async fn catch_up_one(&self, projection: &dyn Projection) {
        loop {
            let checkpoint = match projection.get_last_processed_position().await {
                Ok(pos) => pos,
                Err(e) => {
                    tracing::error!(
                        "projection {} failed to read checkpoint: {e}",
                        projection.name()
                    );
                    return;
                }
            };

            let events = match self
                .store
                .read_events_since(checkpoint, CATCH_UP_BATCH_SIZE)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!("projection {} failed to read events: {e}", projection.name());
                    return;
                }
            };

            if events.is_empty() {
                return;
            }

            let mut last_position = checkpoint;
            for event in &events {
                if let Err(e) = projection.handle(event).await {
                    tracing::warn!(
                        "projection {} failed to apply event at position {}: {e}; skipping",
                        projection.name(),
                        event.stream_position
                    );
                }
                last_position = event.stream_position;
            }

            if let Err(e) = projection.set_last_processed_position(last_position).await {
                tracing::error!(
                    "projection {} failed to persist checkpoint at {last_position}: {e}",
                    projection.name()
                );
                return;
            }

            if events.len() < CATCH_UP_BATCH_SIZE as usize {
                return;
            }
        }
    }

    /// Clears every projection's backing data and checkpoint, then replays
    /// the whole stream from position 0.
    pub async fn rebuild_all(&self) {
        {
            let _guard = self.lock.lock().await;
            for projection in &self.projections {
                if let Err(e) = projection.clear().await {
                    tracing::error!("projection {} failed to clear: {e}", projection.name());
                    continue;
                }
                if let Err(e) = projection.set_last_processed_position(0).await {
                    tracing::error!(
                        "projection {} failed to reset checkpoint: {e}",
                        projection.name()
                    );
                }
            }
        }
        self.catch_up_all().await;
    }

    /// Rebuilds only the named projection.
    pub async fn rebuild(&self, name: &str) {
        let Some(projection) = self.projections.iter().find(|p| p.name() == name) else {
            tracing::warn!("rebuild requested for unknown projection {name}");
            return;
        };

        {
            let _guard = self.lock.lock().await;
            if let Err(e) = projection.clear().await {
                tracing::error!("projection {name} failed to clear: {e}");
                return;
            }
            if let Err(e) = projection.set_last_processed_position(0).await {
                tracing::error!("projection {name} failed to reset checkpoint: {e}");
                return;
            }
        }
        self.catch_up_one(projection.as_ref()).await;
    }

    /// Runs catch-up on the default 5s interval until `cancellation` fires.
    pub async fn start_continuous(&self, cancellation: CancellationToken) {
        self.start_continuous_with_interval(
            cancellation,
            std::time::Duration::from_secs(CONTINUOUS_POLL_INTERVAL_SECS),
        )
        .await
    }

    /// Runs catch-up on `poll_interval` until `cancellation` fires; the
    /// interval is driven by the `projection_poll_interval` config option.
    pub async fn start_continuous_with_interval(
        &self,
        cancellation: CancellationToken,
        poll_interval: std::time::Duration,
    ) {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!("projection orchestrator continuous loop cancelled");
                    return;
                }
                _ = interval.tick() => {
                    self.catch_up_all().await;
                }
            }
        }
    }

    pub async fn status(&self) -> Vec<ProjectionStatus> {
        let current = self.store.current_stream_position().await.unwrap_or(0);
        let mut out = Vec::with_capacity(self.projections.len());
        for projection in &self.projections {
            let last = projection.get_last_processed_position().await.unwrap_or(0);
            out.push(ProjectionStatus {
                name: projection.name().to_string(),
                last,
                current,
                lag: (current - last).max(0),
                up_to_date: last >= current,
            });
        }
        out
    }
}
