//! Tree view projection: the hierarchical category/note read model,
//! with cascading `display_path` updates on category rename/move.

use crate::event::{DomainEvent, StoredEvent};
use crate::projection::Projection;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

pub struct TreeProjection {
    pool: SqlitePool,
}

impl TreeProjection {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tree_view (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                canonical_path TEXT NOT NULL,
                display_path TEXT NOT NULL,
                node_type TEXT NOT NULL,
                name TEXT NOT NULL,
                file_extension TEXT,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
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

    /// Lists direct children of `parent_id`, ordered by `sort_order` then `name`.
    pub async fn list_children(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<TreeRow>, sqlx::Error> {
        let rows = match parent_id {
            Some(parent) => {
                sqlx::query(
                    "SELECT * FROM tree_view WHERE parent_id = ? ORDER BY sort_order ASC, name ASC",
                )
                .bind(parent)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM tree_view WHERE parent_id IS NULL ORDER BY sort_order ASC, name ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(TreeRow::from_row).collect())
    }

    /// Every note-type row, ordered by `display_path`, for full index
    /// rebuilds (the search index's `rebuild_all`) which need the whole note set rather
    /// than one parent's children at a time.
    pub async fn list_all_notes(&self) -> Result<Vec<TreeRow>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM tree_view WHERE node_type = 'note' ORDER BY display_path ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TreeRow::from_row).collect())
    }

    /// Looks up a single row by its canonical (lowercased) path, used to
    /// correlate a file-watcher path event back to the tree entity it
    /// belongs to.
    pub async fn find_by_canonical_path(&self, canonical_path: &str) -> Result<Option<TreeRow>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM tree_view WHERE canonical_path = ?")
            .bind(canonical_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TreeRow::from_row))
    }

    async fn upsert(
        &self,
        id: &str,
        parent_id: Option<&str>,
        node_type: &str,
        name: &str,
        file_extension: Option<&str>,
        display_path: &str,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        let canonical = display_path.to_lowercase();
        sqlx::query(
            r#"
            INSERT INTO tree_view (id, parent_id, canonical_path, display_path, node_type, name, file_extension, is_pinned, sort_order, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                parent_id = excluded.parent_id,
                canonical_path = excluded.canonical_path,
                display_path = excluded.display_path,
                name = excluded.name,
                file_extension = excluded.file_extension,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(id)
        .bind(parent_id)
        .bind(&canonical)
        .bind(display_path)
        .bind(node_type)
        .bind(name)
        .bind(file_extension)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recursively rewrites `display_path`/`canonical_path` for every
    /// descendant of `id` after a category rename or move.
    async fn cascade_rename(&self, id: &str, new_display_path: &str, now: &str) -> Result<(), sqlx::Error> {
        let children = sqlx::query("SELECT id, name FROM tree_view WHERE parent_id = ?")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        for child in children {
            let child_id: String = child.try_get("id")?;
            let child_name: String = child.try_get("name")?;
            let child_display = format!("{new_display_path}/{child_name}");
            let child_canonical = child_display.to_lowercase();

            sqlx::query(
                "UPDATE tree_view SET display_path = ?, canonical_path = ?, modified_at = ? WHERE id = ?",
            )
            .bind(&child_display)
            .bind(&child_canonical)
            .bind(now)
            .bind(&child_id)
            .execute(&self.pool)
            .await?;

            Box::pin(self.cascade_rename(&child_id, &child_display, now)).await?;
        }
        Ok(())
    }

    async fn set_pinned(&self, id: &str, pinned: bool, now: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tree_view SET is_pinned = ?, modified_at = ? WHERE id = ?")
            .bind(pinned as i64)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_cascade(&self, id: &str) -> Result<(), sqlx::Error> {
        let children = sqlx::query("SELECT id FROM tree_view WHERE parent_id = ?")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        for child in children {
            let child_id: String = child.try_get("id")?;
            Box::pin(self.delete_cascade(&child_id)).await?;
        }
        sqlx::query("DELETE FROM tree_view WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TreeRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub canonical_path: String,
    pub display_path: String,
    pub node_type: String,
    pub name: String,
    pub file_extension: Option<String>,
    pub is_pinned: bool,
    pub sort_order: i64,
}

impl TreeRow {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            parent_id: row.get("parent_id"),
            canonical_path: row.get("canonical_path"),
            display_path: row.get("display_path"),
            node_type: row.get("node_type"),
            name: row.get("name"),
            file_extension: row.get("file_extension"),
            is_pinned: row.get::<i64, _>("is_pinned") != 0,
            sort_order: row.get("sort_order"),
        }
    }
}

#[async_trait]
impl Projection for TreeProjection {
    fn name(&self) -> &str {
        "tree_view"
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), String> {
        let now = event.occurred_at.to_rfc3339();
        let result: Result<(), sqlx::Error> = async {
            match &event.payload {
                DomainEvent::CategoryCreated { id, parent_id, name, display_path } => {
                    self.upsert(
                        &id.to_string(),
                        parent_id.as_ref().map(ToString::to_string).as_deref(),
                        "category",
                        name,
                        None,
                        display_path,
                        &now,
                    )
                    .await
                }
                DomainEvent::CategoryRenamed { id, name, display_path }
                | DomainEvent::NoteRenamed { id, name, display_path } => {
                    sqlx::query(
                        "UPDATE tree_view SET name = ?, display_path = ?, canonical_path = ?, modified_at = ? WHERE id = ?",
                    )
                    .bind(name)
                    .bind(display_path)
                    .bind(display_path.to_lowercase())
                    .bind(&now)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?;
                    self.cascade_rename(&id.to_string(), display_path, &now).await
                }
                DomainEvent::CategoryMoved { id, new_parent_id, display_path }
                | DomainEvent::NoteMoved { id, new_parent_id, display_path } => {
                    sqlx::query(
                        "UPDATE tree_view SET parent_id = ?, display_path = ?, canonical_path = ?, modified_at = ? WHERE id = ?",
                    )
                    .bind(new_parent_id.as_ref().map(ToString::to_string))
                    .bind(display_path)
                    .bind(display_path.to_lowercase())
                    .bind(&now)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?;
                    self.cascade_rename(&id.to_string(), display_path, &now).await
                }
                DomainEvent::CategoryDeleted { id } | DomainEvent::NoteDeleted { id } => {
                    self.delete_cascade(&id.to_string()).await
                }
                DomainEvent::CategoryPinned { id } | DomainEvent::NotePinned { id } => {
                    self.set_pinned(&id.to_string(), true, &now).await
                }
                DomainEvent::CategoryUnpinned { id } | DomainEvent::NoteUnpinned { id } => {
                    self.set_pinned(&id.to_string(), false, &now).await
                }
                DomainEvent::NoteCreated { id, parent_id, name, file_extension, display_path } => {
                    self.upsert(
                        &id.to_string(),
                        parent_id.as_ref().map(ToString::to_string).as_deref(),
                        "note",
                        name,
                        file_extension.as_deref(),
                        display_path,
                        &now,
                    )
                    .await
                }
                DomainEvent::NoteTagsSet { .. } | DomainEvent::TagAdded { .. } | DomainEvent::TagRemoved { .. } => {
                    Ok(())
                }
            }
        }
        .await;

        result.map_err(|e| e.to_string())
    }

    async fn clear(&self) -> Result<(), String> {
        sqlx::query("DELETE FROM tree_view")
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use uuid::Uuid;

    async fn test_projection() -> TreeProjection {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let projection = TreeProjection::new(pool);
        projection.init_schema().await.unwrap();
        projection
    }

    fn stored(payload: DomainEvent, position: i64) -> StoredEvent {
        StoredEvent {
            stream_position: position,
            event_type: payload.type_tag().to_string(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    #[tokio::test]
    async fn category_rename_cascades_to_descendant_note() {
        let projection = test_projection().await;
        let category_id = Uuid::new_v4();
        let note_id = Uuid::new_v4();

        projection
            .handle(&stored(
                DomainEvent::CategoryCreated {
                    id: category_id,
                    parent_id: None,
                    name: "Ideas".into(),
                    display_path: "Ideas".into(),
                },
                1,
            ))
            .await
            .unwrap();

        projection
            .handle(&stored(
                DomainEvent::NoteCreated {
                    id: note_id,
                    parent_id: Some(category_id),
                    name: "plan.rtf".into(),
                    file_extension: Some("rtf".into()),
                    display_path: "Ideas/plan.rtf".into(),
                },
                2,
            ))
            .await
            .unwrap();

        projection
            .handle(&stored(
                DomainEvent::CategoryRenamed {
                    id: category_id,
                    name: "Archive".into(),
                    display_path: "Archive".into(),
                },
                3,
            ))
            .await
            .unwrap();

        let children = projection.list_children(Some(&category_id.to_string())).await.unwrap();
        assert_eq!(children[0].display_path, "Archive/plan.rtf");
        assert_eq!(children[0].canonical_path, "archive/plan.rtf");
    }

    #[tokio::test]
    async fn deleting_category_cascades_to_notes() {
        let projection = test_projection().await;
        let category_id = Uuid::new_v4();
        let note_id = Uuid::new_v4();

        projection
            .handle(&stored(
                DomainEvent::CategoryCreated {
                    id: category_id,
                    parent_id: None,
                    name: "Ideas".into(),
                    display_path: "Ideas".into(),
                },
                1,
            ))
            .await
            .unwrap();
        projection
            .handle(&stored(
                DomainEvent::NoteCreated {
                    id: note_id,
                    parent_id: Some(category_id),
                    name: "a.rtf".into(),
                    file_extension: Some("rtf".into()),
                    display_path: "Ideas/a.rtf".into(),
                },
                2,
            ))
            .await
            .unwrap();

        projection
            .handle(&stored(DomainEvent::CategoryDeleted { id: category_id }, 3))
            .await
            .unwrap();

        let roots = projection.list_children(None).await.unwrap();
        assert!(roots.is_empty());
    }

    #[tokio::test]
    async fn finds_row_by_canonical_path() {
        let projection = test_projection().await;
        let note_id = Uuid::new_v4();

        projection
            .handle(&stored(
                DomainEvent::NoteCreated {
                    id: note_id,
                    parent_id: None,
                    name: "Plan.rtf".into(),
                    file_extension: Some("rtf".into()),
                    display_path: "Plan.rtf".into(),
                },
                1,
            ))
            .await
            .unwrap();

        let found = projection.find_by_canonical_path("plan.rtf").await.unwrap().unwrap();
        assert_eq!(found.id, note_id.to_string());
        assert!(projection.find_by_canonical_path("missing.rtf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_all_notes_regardless_of_parent() {
        let projection = test_projection().await;
        let category_id = Uuid::new_v4();

        projection
            .handle(&stored(
                DomainEvent::CategoryCreated {
                    id: category_id,
                    parent_id: None,
                    name: "Ideas".into(),
                    display_path: "Ideas".into(),
                },
                1,
            ))
            .await
            .unwrap();
        projection
            .handle(&stored(
                DomainEvent::NoteCreated {
                    id: Uuid::new_v4(),
                    parent_id: Some(category_id),
                    name: "a.rtf".into(),
                    file_extension: Some("rtf".into()),
                    display_path: "Ideas/a.rtf".into(),
                },
                2,
            ))
            .await
            .unwrap();
        projection
            .handle(&stored(
                DomainEvent::NoteCreated {
                    id: Uuid::new_v4(),
                    parent_id: None,
                    name: "root.rtf".into(),
                    file_extension: Some("rtf".into()),
                    display_path: "root.rtf".into(),
                },
                3,
            ))
            .await
            .unwrap();

        let notes = projection.list_all_notes().await.unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n.node_type == "note"));
    }

    #[tokio::test]
    async fn checkpoint_persists_across_calls() {
        let projection = test_projection().await;
        assert_eq!(projection.get_last_processed_position().await.unwrap(), 0);
        projection.set_last_processed_position(42).await.unwrap();
        assert_eq!(projection.get_last_processed_position().await.unwrap(), 42);
    }
}
