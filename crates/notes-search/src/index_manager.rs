//! Index manager: translates file-system events into FTS repository
//! operations, applies the eligibility filter, drives bulk rebuilds with
//! progress reporting, and debounces high-volume per-file event bursts.

use crate::repository::{FtsError, FtsRepository, NoteDocument};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAction {
    Index,
    Update,
    Remove,
    RemoveAndIndex,
}

/// Translates a raw file-event kind into the FTS operation it implies.
/// A rename is a remove of the old path plus an index of the new one.
pub fn translate(kind: FileEventKind) -> IndexAction {
    match kind {
        FileEventKind::Created => IndexAction::Index,
        FileEventKind::Modified => IndexAction::Update,
        FileEventKind::Deleted => IndexAction::Remove,
        FileEventKind::Renamed => IndexAction::RemoveAndIndex,
    }
}

#[derive(Debug, Clone)]
pub struct EligibilityConfig {
    pub indexed_extensions: Vec<String>,
    pub max_indexed_file_size: u64,
    pub excluded_directories: Vec<String>,
    pub skip_hidden: bool,
}

/// Whether `path` (of size `size_bytes`, if it exists) should be indexed.
pub fn is_eligible(path: &Path, size_bytes: Option<u64>, exists: bool, config: &EligibilityConfig) -> bool {
    if !exists {
        return false;
    }

    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !config.indexed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)) {
        return false;
    }

    if let Some(size) = size_bytes {
        if size > config.max_indexed_file_size {
            return false;
        }
    }

    let path_str = path.to_string_lossy();
    if config.excluded_directories.iter().any(|excluded| path_str.contains(excluded.as_str())) {
        return false;
    }

    if config.skip_hidden {
        let is_hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);
        if is_hidden {
            return false;
        }
    }

    true
}

#[derive(Debug, Clone, Default)]
pub struct RebuildProgress {
    pub processed: usize,
    pub total: usize,
    pub current_file: Option<String>,
    pub stage: RebuildStage,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RebuildStage {
    #[default]
    Clearing,
    Enumerating,
    Indexing,
    Optimizing,
    Done,
}

pub struct IndexManager {
    repository: Arc<FtsRepository>,
    eligibility: EligibilityConfig,
    pending: Mutex<HashMap<PathBuf, JoinHandle<()>>>,
    debounce: Duration,
}

impl IndexManager {
    pub fn new(repository: Arc<FtsRepository>, eligibility: EligibilityConfig) -> Self {
        Self {
            repository,
            eligibility,
            pending: Mutex::new(HashMap::new()),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }

    /// Schedules `note` to be applied via `action` after the debounce
    /// window elapses, cancelling any still-pending action for the same
    /// path so only the last action per file inside the window executes.
    pub async fn schedule(&self, path: PathBuf, action: IndexAction, note: Option<NoteDocument>) {
        let mut pending = self.pending.lock().await;
        if let Some(handle) = pending.remove(&path) {
            handle.abort();
        }

        let repository = Arc::clone(&self.repository);
        let debounce = self.debounce;
        let path_for_task = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(e) = apply_action(&repository, action, &path_for_task, note) {
                tracing::warn!("indexing action failed for {}: {e}", path_for_task.display());
            }
        });

        pending.insert(path, handle);
    }

    /// Applies eligibility filtering before scheduling. Ineligible files are
    /// silently dropped (e.g. a file outside the indexed extension set).
    pub async fn handle_file_event(
        &self,
        path: PathBuf,
        kind: FileEventKind,
        size_bytes: Option<u64>,
        exists: bool,
        note: Option<NoteDocument>,
    ) {
        if kind != FileEventKind::Deleted && !is_eligible(&path, size_bytes, exists, &self.eligibility) {
            return;
        }
        let action = translate(kind);
        self.schedule(path, action, note).await;
    }

    /// Clears the index, then indexes every entry yielded by `enumerate`,
    /// reporting progress via `progress_tx`. Continues past per-file
    /// failures, counting them in the final `RebuildProgress`.
    pub async fn rebuild_all(
        &self,
        candidates: Vec<NoteDocument>,
        optimize_after: bool,
        progress_tx: Option<mpsc::UnboundedSender<RebuildProgress>>,
    ) -> RebuildProgress {
        let emit = |progress: &RebuildProgress| {
            if let Some(tx) = &progress_tx {
                let _ = tx.send(progress.clone());
            }
        };

        let mut progress = RebuildProgress {
            total: candidates.len(),
            stage: RebuildStage::Clearing,
            ..Default::default()
        };
        emit(&progress);

        if let Err(e) = self.repository.clear() {
            tracing::error!("rebuild failed to clear index: {e}");
            progress.errors += 1;
        }

        progress.stage = RebuildStage::Indexing;
        for note in &candidates {
            progress.current_file = Some(note.file_path.clone());
            match self.repository.index(note) {
                Ok(()) => progress.processed += 1,
                Err(e) => {
                    tracing::warn!("rebuild failed to index {}: {e}", note.file_path);
                    progress.errors += 1;
                }
            }
            emit(&progress);
        }

        if optimize_after {
            progress.stage = RebuildStage::Optimizing;
            emit(&progress);
            if let Err(e) = self.repository.optimize() {
                tracing::warn!("rebuild optimize step failed: {e}");
                progress.errors += 1;
            }
        }

        progress.stage = RebuildStage::Done;
        progress.current_file = None;
        emit(&progress);
        progress
    }
}

fn apply_action(
    repository: &FtsRepository,
    action: IndexAction,
    path: &Path,
    note: Option<NoteDocument>,
) -> Result<(), FtsError> {
    match action {
        IndexAction::Index | IndexAction::Update => {
            if let Some(note) = note {
                repository.index(&note)
            } else {
                Ok(())
            }
        }
        IndexAction::Remove => repository.remove_by_path(&path.to_string_lossy()),
        IndexAction::RemoveAndIndex => {
            repository.remove_by_path(&path.to_string_lossy())?;
            if let Some(note) = note {
                repository.index(&note)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EligibilityConfig {
        EligibilityConfig {
            indexed_extensions: vec!["rtf".into(), "md".into()],
            max_indexed_file_size: 1024,
            excluded_directories: vec![".notes".into()],
            skip_hidden: true,
        }
    }

    #[test]
    fn rejects_wrong_extension() {
        assert!(!is_eligible(Path::new("/notes/a.png"), Some(10), true, &config()));
    }

    #[test]
    fn rejects_oversized_file() {
        assert!(!is_eligible(Path::new("/notes/a.rtf"), Some(2048), true, &config()));
    }

    #[test]
    fn rejects_excluded_directory() {
        assert!(!is_eligible(Path::new("/vault/.notes/wal.rtf"), Some(10), true, &config()));
    }

    #[test]
    fn rejects_hidden_file() {
        assert!(!is_eligible(Path::new("/notes/.a.rtf"), Some(10), true, &config()));
    }

    #[test]
    fn accepts_eligible_file() {
        assert!(is_eligible(Path::new("/notes/a.rtf"), Some(10), true, &config()));
    }

    #[test]
    fn rename_translates_to_remove_and_index() {
        assert_eq!(translate(FileEventKind::Renamed), IndexAction::RemoveAndIndex);
    }

    #[tokio::test]
    async fn rebuild_reports_progress_and_counts_errors_without_stopping() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Arc::new(FtsRepository::open_or_create(dir.path()).unwrap());
        let manager = IndexManager::new(Arc::clone(&repo), config());

        let notes = vec![crate::repository::NoteDocument {
            note_id: "1".into(),
            title: "A".into(),
            content: "alpha".into(),
            content_preview: "alpha".into(),
            category_id: "root".into(),
            file_path: "/notes/a.rtf".into(),
            last_modified: 0,
            file_size: 5,
            created_date: 0,
            usage_count: 0,
            last_accessed: 0,
        }];

        let progress = manager.rebuild_all(notes, false, None).await;
        assert_eq!(progress.processed, 1);
        assert_eq!(progress.errors, 0);
        assert_eq!(progress.stage, RebuildStage::Done);
    }
}
