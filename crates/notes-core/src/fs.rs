//! File System Port: the narrow abstraction every disk operation in
//! this crate flows through.
//!
//! `rename` must be an atomic replace on the same volume when the underlying
//! platform supports it; callers are responsible for colocating the temp
//! file and its target so the rename stays on one volume. This trait never
//! retries; failures surface raw so callers (the save coordinator) can apply their own
//! retry/backoff policy.

use async_trait::async_trait;
use globset::Glob;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("not a directory: {0}")]
    NotDirectory(PathBuf),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Directory entry returned by `list`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Platform-independent filesystem abstraction. All disk I/O in this crate
/// and its siblings flows through an implementation of this trait.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;

    /// Writes `bytes` to `path`, creating parent directories as needed.
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Atomic replace of `dst` with `src`. When `overwrite` is false the
    /// call fails if `dst` already exists.
    async fn rename(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()>;

    async fn delete(&self, path: &Path) -> Result<()>;

    /// Lists entries directly under `dir`. `glob`, when present, is matched
    /// against the entry's file name (not the full path).
    async fn list(&self, dir: &Path, glob: Option<&str>) -> Result<Vec<DirEntry>>;

    async fn create_dir(&self, path: &Path) -> Result<()>;

    async fn get_mtime(&self, path: &Path) -> Result<SystemTime>;

    async fn get_size(&self, path: &Path) -> Result<u64>;
}

/// Recursively lists every file entry at or below `dir` whose file name
/// matches `glob` (when present). Directories that fail to list (e.g. a
/// permission error on one subtree) are skipped with a warning rather than
/// aborting the whole walk, since startup recovery and index rebuilds must
/// make best-effort progress over the rest of the tree.
pub async fn walk_recursive<F: FileSystem + ?Sized>(
    fs: &F,
    dir: &Path,
    glob: Option<&str>,
) -> Vec<DirEntry> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = match fs.list(&current, None).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("walk skipped {}: {e}", current.display());
                continue;
            }
        };
        for entry in entries {
            if entry.is_dir {
                stack.push(entry.path.clone());
                continue;
            }
            let matches = match glob {
                None => true,
                Some(pattern) => entry
                    .path
                    .file_name()
                    .map(|name| {
                        Glob::new(pattern)
                            .map(|g| g.compile_matcher().is_match(name))
                            .unwrap_or(false)
                    })
                    .unwrap_or(false),
            };
            if matches {
                out.push(entry);
            }
        }
    }
    out
}

/// In-memory filesystem for unit tests shared across notes-core, notes-store,
/// and notes-search test suites.
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
    dirs: RwLock<HashMap<PathBuf, ()>>,
    mtimes: RwLock<HashMap<PathBuf, SystemTime>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the mtime of an existing path, for crash-recovery ordering tests.
    pub fn set_mtime(&self, path: &Path, mtime: SystemTime) {
        self.mtimes.write().unwrap().insert(path.to_path_buf(), mtime);
    }

    fn ensure_parents(&self, path: &Path) {
        let mut dirs = self.dirs.write().unwrap();
        let mut cur = path.parent();
        while let Some(p) = cur {
            if p.as_os_str().is_empty() || !dirs.insert(p.to_path_buf(), ()).is_none() {
                // already present or root reached; keep walking up to register all ancestors
            }
            cur = p.parent();
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.files.read().unwrap().contains_key(path)
            || self.dirs.read().unwrap().contains_key(path))
    }

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }

    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_parents(path);
        self.files
            .write()
            .unwrap()
            .insert(path.to_path_buf(), bytes.to_vec());
        self.mtimes
            .write()
            .unwrap()
            .insert(path.to_path_buf(), SystemTime::now());
        Ok(())
    }

    async fn rename(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
        if !overwrite && self.exists(dst).await? {
            return Err(FsError::AlreadyExists(dst.to_path_buf()));
        }
        if self.dirs.read().unwrap().contains_key(dst) {
            return Err(FsError::NotDirectory(dst.to_path_buf()));
        }
        let content = self
            .files
            .write()
            .unwrap()
            .remove(src)
            .ok_or_else(|| FsError::NotFound(src.to_path_buf()))?;
        self.ensure_parents(dst);
        self.files.write().unwrap().insert(dst.to_path_buf(), content);
        let mtime = self
            .mtimes
            .write()
            .unwrap()
            .remove(src)
            .unwrap_or_else(SystemTime::now);
        self.mtimes.write().unwrap().insert(dst.to_path_buf(), mtime);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        if self.files.write().unwrap().remove(path).is_some() {
            self.mtimes.write().unwrap().remove(path);
            return Ok(());
        }
        if self.dirs.write().unwrap().remove(path).is_some() {
            return Ok(());
        }
        Err(FsError::NotFound(path.to_path_buf()))
    }

    async fn list(&self, dir: &Path, glob: Option<&str>) -> Result<Vec<DirEntry>> {
        let matcher = glob.map(|g| Glob::new(g).unwrap().compile_matcher());
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for path in self.files.read().unwrap().keys() {
            if path.parent() == Some(dir) {
                let name = path.file_name().unwrap();
                if matcher.as_ref().is_none_or(|m| m.is_match(name)) && seen.insert(path.clone()) {
                    out.push(DirEntry {
                        path: path.clone(),
                        is_dir: false,
                    });
                }
            }
        }
        for path in self.dirs.read().unwrap().keys() {
            if path.parent() == Some(dir) && seen.insert(path.clone()) {
                out.push(DirEntry {
                    path: path.clone(),
                    is_dir: true,
                });
            }
        }
        Ok(out)
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        self.ensure_parents(path);
        self.dirs.write().unwrap().insert(path.to_path_buf(), ());
        Ok(())
    }

    async fn get_mtime(&self, path: &Path) -> Result<SystemTime> {
        self.mtimes
            .read()
            .unwrap()
            .get(path)
            .copied()
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }

    async fn get_size(&self, path: &Path) -> Result<u64> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }
}
