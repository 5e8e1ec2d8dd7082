//! Document and sidecar metadata data model.
//!
//! A `Document`'s identity is a stable UUID, immutable for its lifetime; its
//! path may change via rename/move. Content is an opaque byte string; this
//! crate never parses rich-text, it only moves bytes to and from disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A single open document tracked by the save coordination layer.
#[derive(Debug, Clone)]
pub struct Document {
    id: Uuid,
    path: PathBuf,
    title: String,
    dirty: bool,
    last_modified: DateTime<Utc>,
}

impl Document {
    pub fn new(id: Uuid, path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            title: title.into(),
            dirty: false,
            last_modified: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Marks the document as having in-memory content that differs from
    /// disk. Called by the editor's edit path (outside this crate's scope);
    /// exposed here so the scheduler can enumerate dirty documents.
    pub fn touch(&mut self) {
        self.dirty = true;
        self.last_modified = Utc::now();
    }

    /// Marks the document as persisted, called by the save coordinator after a successful
    /// atomic save.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Identity is immutable; only the path may change, e.g. on rename/move.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// The sidecar metadata path for this document: `<path>.meta.json`.
    pub fn metadata_path(&self) -> PathBuf {
        sidecar_path_for(&self.path)
    }
}

/// Returns the sidecar metadata path for an arbitrary note path.
pub fn sidecar_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".meta.json");
    PathBuf::from(os)
}

/// JSON sidecar metadata co-located with each note file.
///
/// Invariant: `id` always equals the owning document's identity. Unknown
/// keys under `extensions` must round-trip byte-for-byte across rewrites;
/// we never interpret them, only preserve them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SidecarMetadata {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    /// Arbitrary caller-defined fields. `BTreeMap` keeps serialization key
    /// order deterministic, which keeps metadata round-trips byte-for-byte
    /// stable.
    #[serde(default)]
    pub extensions: BTreeMap<String, Value>,
}

impl SidecarMetadata {
    /// Synthesizes a minimal sidecar when none exists or the existing one is
    /// unreadable: never invent fields we don't recognize, only the required
    /// `id`/`created`.
    pub fn synthesize(id: Uuid) -> Self {
        Self {
            id,
            created: Utc::now(),
            extensions: BTreeMap::new(),
        }
    }

    /// Serializes deterministically (stable field order, pretty-printed) so
    /// an unmodified read-then-write round-trip is byte-identical.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_path_appends_suffix() {
        let path = Path::new("/notes/Ideas/plan.rtf");
        assert_eq!(
            sidecar_path_for(path),
            PathBuf::from("/notes/Ideas/plan.rtf.meta.json")
        );
    }

    #[test]
    fn sidecar_round_trips_unknown_extensions() {
        let id = Uuid::new_v4();
        let mut meta = SidecarMetadata::synthesize(id);
        meta.extensions
            .insert("custom_flag".into(), Value::Bool(true));
        meta.extensions
            .insert("nested".into(), serde_json::json!({"a": 1}));

        let bytes = meta.to_json_bytes().unwrap();
        let restored = SidecarMetadata::from_json_bytes(&bytes).unwrap();
        assert_eq!(meta, restored);

        // Writing back the unmodified value produces byte-identical output.
        let bytes2 = restored.to_json_bytes().unwrap();
        assert_eq!(bytes, bytes2);
    }

    #[test]
    fn document_touch_and_mark_clean() {
        let mut doc = Document::new(Uuid::new_v4(), "/notes/a.md", "a");
        assert!(!doc.is_dirty());
        doc.touch();
        assert!(doc.is_dirty());
        doc.mark_clean();
        assert!(!doc.is_dirty());
    }
}
