//! Event Store: a single ordered, append-only stream backed by SQLite.
//!
//! Positions are dense and gap-free per store. SQLite's `INTEGER PRIMARY
//! KEY` rowid semantics give us that for free as long as rows are only ever
//! inserted, never deleted. Every successful append commits a transaction,
//! which on SQLite implies an fsync of the WAL/journal, giving callers a
//! crash-durable append before `append_events` returns.

use crate::event::DomainEvent;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency conflict: expected version {expected}, actual {actual}")]
    Conflict { expected: i64, actual: i64 },

    #[error("event encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the event table if it does not already exist. Safe to call
    /// on every startup.
    pub async fn init_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                stream_position INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn current_stream_position(&self) -> Result<i64, EventStoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(stream_position), 0) AS pos FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("pos")?)
    }

    /// Appends `events` if and only if the store's current position equals
    /// `expected_version`, returning the new position. There are no
    /// per-document sub-streams, one ordered log for the whole vault,
    /// so `expected_version` is simply the caller's last-known
    /// `current_stream_position()`.
    pub async fn append_events(
        &self,
        expected_version: i64,
        events: &[DomainEvent],
    ) -> Result<i64, EventStoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT COALESCE(MAX(stream_position), 0) AS pos FROM events")
            .fetch_one(&mut *tx)
            .await?;
        let actual: i64 = row.try_get("pos")?;
        if actual != expected_version {
            return Err(EventStoreError::Conflict {
                expected: expected_version,
                actual,
            });
        }

        let now = Utc::now();
        for event in events {
            let payload = serde_json::to_string(event)?;
            sqlx::query(
                "INSERT INTO events (event_type, occurred_at, payload) VALUES (?, ?, ?)",
            )
            .bind(event.type_tag())
            .bind(now.to_rfc3339())
            .bind(payload)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.current_stream_position().await
    }

    /// Reads up to `batch_size` events strictly after `position`, in
    /// position order. Rows whose `event_type` is unrecognized by this
    /// build are skipped with a warning rather than failing the batch, so
    /// forward compatibility with future event types doesn't break replay.
    pub async fn read_events_since(
        &self,
        position: i64,
        batch_size: i64,
    ) -> Result<Vec<crate::event::StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            "SELECT stream_position, event_type, occurred_at, payload FROM events \
             WHERE stream_position > ? ORDER BY stream_position ASC LIMIT ?",
        )
        .bind(position)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let stream_position: i64 = row.try_get("stream_position")?;
            let event_type: String = row.try_get("event_type")?;
            let occurred_at_raw: String = row.try_get("occurred_at")?;
            let payload_raw: String = row.try_get("payload")?;

            let occurred_at = match chrono::DateTime::parse_from_rfc3339(&occurred_at_raw) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!(
                        "skipping event at position {stream_position}: bad timestamp: {e}"
                    );
                    continue;
                }
            };

            match serde_json::from_str::<DomainEvent>(&payload_raw) {
                Ok(payload) => out.push(crate::event::StoredEvent {
                    stream_position,
                    event_type,
                    occurred_at,
                    payload,
                }),
                Err(e) => {
                    tracing::warn!(
                        "skipping event at position {stream_position} (type {event_type}): {e}"
                    );
                }
            }
        }

        Ok(out)
    }

    /// Flushes a WAL checkpoint on shutdown. Failures are logged, never
    /// propagated: individual appends have already fsync'd via their own
    /// transaction commits, so a failed checkpoint loses nothing.
    pub async fn checkpoint_on_shutdown(&self) {
        if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
        {
            tracing::warn!("WAL checkpoint on shutdown failed (data already durable): {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EntityType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_and_read_in_order() {
        let store = EventStore::new(test_pool().await);
        store.init_schema().await.unwrap();

        let id = uuid::Uuid::new_v4();
        let v1 = store
            .append_events(
                0,
                &[DomainEvent::NoteCreated {
                    id,
                    parent_id: None,
                    name: "plan".into(),
                    file_extension: Some("rtf".into()),
                    display_path: "plan.rtf".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let v2 = store
            .append_events(1, &[DomainEvent::NotePinned { id }])
            .await
            .unwrap();
        assert_eq!(v2, 2);

        let events = store.read_events_since(0, 100).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stream_position, 1);
        assert_eq!(events[1].stream_position, 2);
    }

    #[tokio::test]
    async fn append_rejects_stale_expected_version() {
        let store = EventStore::new(test_pool().await);
        store.init_schema().await.unwrap();

        let id = uuid::Uuid::new_v4();
        store
            .append_events(
                0,
                &[DomainEvent::NoteCreated {
                    id,
                    parent_id: None,
                    name: "a".into(),
                    file_extension: None,
                    display_path: "a".into(),
                }],
            )
            .await
            .unwrap();

        let err = store
            .append_events(0, &[DomainEvent::NoteDeleted { id }])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::Conflict { expected: 0, actual: 1 }
        ));
    }

    #[tokio::test]
    async fn tags_set_event_round_trips_through_json_payload() {
        let store = EventStore::new(test_pool().await);
        store.init_schema().await.unwrap();

        let entity_id = uuid::Uuid::new_v4();
        store
            .append_events(
                0,
                &[DomainEvent::NoteTagsSet {
                    entity_id,
                    entity_type: EntityType::Note,
                    tags: vec![crate::event::TagAssignment {
                        tag: "project".into(),
                        display_name: "Project".into(),
                        source: "user".into(),
                    }],
                }],
            )
            .await
            .unwrap();

        let events = store.read_events_since(0, 10).await.unwrap();
        match &events[0].payload {
            DomainEvent::NoteTagsSet { tags, .. } => assert_eq!(tags[0].tag, "project"),
            other => panic!("unexpected event payload: {other:?}"),
        }
    }
}
