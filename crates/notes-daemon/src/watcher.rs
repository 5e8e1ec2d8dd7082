//! File Watcher: debounced notifications of note file changes, with
//! per-path suspend/resume so the save coordinator can silence the
//! watcher's own writes.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind, Debouncer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

type SuspendedSet = Arc<Mutex<HashSet<PathBuf>>>;

pub struct FileWatcher {
    root: PathBuf,
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    event_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FileEvent>>,
    suspended: SuspendedSet,
}

impl FileWatcher {
    pub fn new(root: PathBuf) -> notify::Result<Self> {
        Self::with_debounce(root, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(root: PathBuf, debounce: Duration) -> notify::Result<Self> {
        let root = root.canonicalize().unwrap_or(root);
        let (tx, event_rx) = mpsc::unbounded_channel();
        let suspended: SuspendedSet = Arc::new(Mutex::new(HashSet::new()));
        let suspended_for_callback = Arc::clone(&suspended);

        let mut debouncer = new_debouncer(debounce, move |result: Result<Vec<DebouncedEvent>, notify::Error>| {
            match result {
                Ok(events) => {
                    for event in events {
                        if is_suspended(&suspended_for_callback, &event.path) {
                            continue;
                        }
                        let kind = match event.kind {
                            DebouncedEventKind::Any => FileEventKind::Modified,
                            DebouncedEventKind::AnyContinuous => FileEventKind::Modified,
                            _ => FileEventKind::Modified,
                        };
                        if tx.send(FileEvent { path: event.path, kind }).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::error!("file watcher error: {e:?}"),
            }
        })?;

        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            _debouncer: debouncer,
            event_rx: tokio::sync::Mutex::new(event_rx),
            suspended,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Events for `path` are dropped until `resume` is called.
    pub fn suspend(&self, path: &Path) {
        self.suspended.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn resume(&self, path: &Path) {
        self.suspended.lock().unwrap().remove(path);
    }

    /// Receives the next debounced event. Callable through a shared `Arc`
    /// since only one task is expected to drain this in practice, but the
    /// internal mutex makes concurrent callers safe rather than racy.
    pub async fn recv(&self) -> Option<FileEvent> {
        self.event_rx.lock().await.recv().await
    }
}

fn is_suspended(suspended: &SuspendedSet, path: &Path) -> bool {
    suspended.lock().unwrap().contains(path)
}
