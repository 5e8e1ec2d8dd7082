//! Domain events appended to the event store and replayed by
//! projections. Serialized as a tagged JSON enum so the stream's
//! on-disk representation is self-describing and unknown future tags can
//! be skipped during replay rather than failing it outright.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Note,
    Category,
}

/// A single fact appended to the ordered event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DomainEvent {
    CategoryCreated {
        id: Uuid,
        parent_id: Option<Uuid>,
        name: String,
        display_path: String,
    },
    CategoryRenamed {
        id: Uuid,
        name: String,
        display_path: String,
    },
    CategoryMoved {
        id: Uuid,
        new_parent_id: Option<Uuid>,
        display_path: String,
    },
    CategoryDeleted {
        id: Uuid,
    },
    CategoryPinned {
        id: Uuid,
    },
    CategoryUnpinned {
        id: Uuid,
    },

    NoteCreated {
        id: Uuid,
        parent_id: Option<Uuid>,
        name: String,
        file_extension: Option<String>,
        display_path: String,
    },
    NoteRenamed {
        id: Uuid,
        name: String,
        display_path: String,
    },
    NoteMoved {
        id: Uuid,
        new_parent_id: Option<Uuid>,
        display_path: String,
    },
    NotePinned {
        id: Uuid,
    },
    NoteUnpinned {
        id: Uuid,
    },
    NoteDeleted {
        id: Uuid,
    },

    NoteTagsSet {
        entity_id: Uuid,
        entity_type: EntityType,
        tags: Vec<TagAssignment>,
    },
    TagAdded {
        entity_id: Uuid,
        entity_type: EntityType,
        tag: TagAssignment,
    },
    TagRemoved {
        entity_id: Uuid,
        entity_type: EntityType,
        tag: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagAssignment {
    pub tag: String,
    pub display_name: String,
    pub source: String,
}

impl DomainEvent {
    /// The stable string tag used as the on-disk `event_type` discriminant.
    /// Computed independently of serde's tag so callers can branch on it
    /// without deserializing the payload (e.g. for metrics).
    pub fn type_tag(&self) -> &'static str {
        match self {
            DomainEvent::CategoryCreated { .. } => "category_created",
            DomainEvent::CategoryRenamed { .. } => "category_renamed",
            DomainEvent::CategoryMoved { .. } => "category_moved",
            DomainEvent::CategoryDeleted { .. } => "category_deleted",
            DomainEvent::CategoryPinned { .. } => "category_pinned",
            DomainEvent::CategoryUnpinned { .. } => "category_unpinned",
            DomainEvent::NoteCreated { .. } => "note_created",
            DomainEvent::NoteRenamed { .. } => "note_renamed",
            DomainEvent::NoteMoved { .. } => "note_moved",
            DomainEvent::NotePinned { .. } => "note_pinned",
            DomainEvent::NoteUnpinned { .. } => "note_unpinned",
            DomainEvent::NoteDeleted { .. } => "note_deleted",
            DomainEvent::NoteTagsSet { .. } => "note_tags_set",
            DomainEvent::TagAdded { .. } => "tag_added",
            DomainEvent::TagRemoved { .. } => "tag_removed",
        }
    }
}

/// An event as it is physically stored: the domain payload plus its
/// position in the stream and arrival time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub stream_position: i64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: DomainEvent,
}
