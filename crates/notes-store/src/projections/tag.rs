//! Tag projection: `tag_vocabulary` (keyed by lowercased tag) and
//! `entity_tags` (keyed by `(entity_id, tag)`), with set-semantics for
//! `NoteTagsSet`: delete-then-add, not additive.

use crate::event::{DomainEvent, EntityType, StoredEvent};
use crate::projection::Projection;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

pub struct TagProjection {
    pool: SqlitePool,
}

impl TagProjection {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tag_vocabulary (
                tag TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0,
                first_used_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_tags (
                entity_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                tag TEXT NOT NULL,
                display_name TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (entity_id, tag)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS projection_metadata ( \
                projection_name TEXT PRIMARY KEY, \
                last_processed_position INTEGER NOT NULL DEFAULT 0, \
                last_updated_at TEXT NOT NULL, \
                status TEXT NOT NULL DEFAULT 'ok' \
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn usage_count(&self, tag: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT usage_count FROM tag_vocabulary WHERE tag = ?")
            .bind(tag.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("usage_count")).unwrap_or(0))
    }

    pub async fn tags_for_entity(&self, entity_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT tag FROM entity_tags WHERE entity_id = ? ORDER BY tag ASC")
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("tag")).collect())
    }

    async fn add_tag(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        tag: &str,
        display_name: &str,
        source: &str,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        let lowered = tag.to_lowercase();
        let entity_type_str = match entity_type {
            EntityType::Note => "note",
            EntityType::Category => "category",
        };

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO entity_tags (entity_id, entity_type, tag, display_name, source, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entity_id)
        .bind(entity_type_str)
        .bind(&lowered)
        .bind(display_name)
        .bind(source)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO tag_vocabulary (tag, display_name, usage_count, first_used_at, last_used_at)
            VALUES (?, ?, 1, ?, ?)
            ON CONFLICT(tag) DO UPDATE SET
                usage_count = usage_count + 1,
                last_used_at = excluded.last_used_at,
                display_name = excluded.display_name
            "#,
        )
        .bind(&lowered)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_tag(&self, entity_id: &str, tag: &str) -> Result<(), sqlx::Error> {
        let lowered = tag.to_lowercase();
        let removed = sqlx::query("DELETE FROM entity_tags WHERE entity_id = ? AND tag = ?")
            .bind(entity_id)
            .bind(&lowered)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;

        if removed {
            sqlx::query(
                "UPDATE tag_vocabulary SET usage_count = MAX(usage_count - 1, 0) WHERE tag = ?",
            )
            .bind(&lowered)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn set_tags(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        tags: &[crate::event::TagAssignment],
        now: &str,
    ) -> Result<(), sqlx::Error> {
        let existing = self.tags_for_entity(entity_id).await?;
        for tag in &existing {
            self.remove_tag(entity_id, tag).await?;
        }
        for assignment in tags {
            self.add_tag(
                entity_id,
                entity_type,
                &assignment.tag,
                &assignment.display_name,
                &assignment.source,
                now,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Projection for TagProjection {
    fn name(&self) -> &str {
        "tag_vocabulary"
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), String> {
        let now = event.occurred_at.to_rfc3339();
        let result: Result<(), sqlx::Error> = async {
            match &event.payload {
                DomainEvent::TagAdded { entity_id, entity_type, tag } => {
                    self.add_tag(
                        &entity_id.to_string(),
                        *entity_type,
                        &tag.tag,
                        &tag.display_name,
                        &tag.source,
                        &now,
                    )
                    .await
                }
                DomainEvent::TagRemoved { entity_id, tag, .. } => {
                    self.remove_tag(&entity_id.to_string(), tag).await
                }
                DomainEvent::NoteTagsSet { entity_id, entity_type, tags } => {
                    self.set_tags(&entity_id.to_string(), *entity_type, tags, &now).await
                }
                DomainEvent::NoteDeleted { id } | DomainEvent::CategoryDeleted { id } => {
                    let existing = self.tags_for_entity(&id.to_string()).await?;
                    for tag in existing {
                        self.remove_tag(&id.to_string(), &tag).await?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }
        .await;
        result.map_err(|e| e.to_string())
    }

    async fn clear(&self) -> Result<(), String> {
        sqlx::query("DELETE FROM entity_tags")
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        sqlx::query("DELETE FROM tag_vocabulary")
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn get_last_processed_position(&self) -> Result<i64, String> {
        let row = sqlx::query(
            "SELECT last_processed_position FROM projection_metadata WHERE projection_name = ?",
        )
        .bind(self.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(row.map(|r| r.get::<i64, _>("last_processed_position")).unwrap_or(0))
    }

    async fn set_last_processed_position(&self, position: i64) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO projection_metadata (projection_name, last_processed_position, last_updated_at, status)
            VALUES (?, ?, ?, 'ok')
            ON CONFLICT(projection_name) DO UPDATE SET
                last_processed_position = excluded.last_processed_position,
                last_updated_at = excluded.last_updated_at,
                status = 'ok'
            "#,
        )
        .bind(self.name())
        .bind(position)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}
