//! Native filesystem implementation using `tokio::fs`, backing the
//! `FileSystem` port for the daemon binary.

use async_trait::async_trait;
use notes_core::fs::{DirEntry, FileSystem, FsError, Result};
use std::path::Path;
use std::time::SystemTime;
use tokio::fs;

pub struct NativeFs;

impl NativeFs {
    pub fn new() -> Self {
        Self
    }

    fn io_err(path: &Path, source: std::io::Error) -> FsError {
        if source.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound(path.to_path_buf())
        } else {
            FsError::Io { path: path.to_path_buf(), source }
        }
    }
}

impl Default for NativeFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(fs::metadata(path).await.is_ok())
    }

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).await.map_err(|e| Self::io_err(path, e))
    }

    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_err(parent, e))?;
        }
        fs::write(path, bytes).await.map_err(|e| Self::io_err(path, e))
    }

    async fn rename(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
        if !overwrite && fs::metadata(dst).await.is_ok() {
            return Err(FsError::AlreadyExists(dst.to_path_buf()));
        }
        fs::rename(src, dst).await.map_err(|e| Self::io_err(src, e))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let metadata = fs::metadata(path).await.map_err(|e| Self::io_err(path, e))?;
        if metadata.is_dir() {
            fs::remove_dir_all(path).await.map_err(|e| Self::io_err(path, e))
        } else {
            fs::remove_file(path).await.map_err(|e| Self::io_err(path, e))
        }
    }

    async fn list(&self, dir: &Path, glob: Option<&str>) -> Result<Vec<DirEntry>> {
        let matcher = glob.map(|g| globset::Glob::new(g).unwrap().compile_matcher());
        let mut reader = fs::read_dir(dir).await.map_err(|e| Self::io_err(dir, e))?;
        let mut out = Vec::new();

        while let Some(entry) = reader.next_entry().await.map_err(|e| Self::io_err(dir, e))? {
            let name = entry.file_name();
            if matcher.as_ref().is_some_and(|m| !m.is_match(&name)) {
                continue;
            }
            let metadata = entry.metadata().await.map_err(|e| Self::io_err(&entry.path(), e))?;
            out.push(DirEntry {
                path: entry.path(),
                is_dir: metadata.is_dir(),
            });
        }
        Ok(out)
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|e| Self::io_err(path, e))
    }

    async fn get_mtime(&self, path: &Path) -> Result<SystemTime> {
        let metadata = fs::metadata(path).await.map_err(|e| Self::io_err(path, e))?;
        metadata.modified().map_err(|e| Self::io_err(path, e))
    }

    async fn get_size(&self, path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path).await.map_err(|e| Self::io_err(path, e))?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_read_and_rename_roundtrip() {
        let dir = TempDir::new().unwrap();
        let fs_port = NativeFs::new();
        let src = dir.path().join("a.rtf.tmp");
        let dst = dir.path().join("a.rtf");

        fs_port.write_bytes(&src, b"content").await.unwrap();
        fs_port.rename(&src, &dst, true).await.unwrap();

        assert!(!fs_port.exists(&src).await.unwrap());
        assert_eq!(fs_port.read_bytes(&dst).await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn list_filters_by_glob() {
        let dir = TempDir::new().unwrap();
        let fs_port = NativeFs::new();
        fs_port.write_bytes(&dir.path().join("a.rtf"), b"1").await.unwrap();
        fs_port.write_bytes(&dir.path().join("b.tmp"), b"2").await.unwrap();

        let entries = fs_port.list(dir.path(), Some("*.tmp")).await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
