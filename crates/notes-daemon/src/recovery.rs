//! Startup Recovery: runs once before any document is opened,
//! reconciling leftover temp files, surfacing emergency dumps, and aging
//! out old backups.

use notes_core::fs::{walk_recursive, FileSystem};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const BACKUP_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const TMP_GLOB: &str = "*.tmp";
const BACKUP_GLOB: &str = "*.backup_*";
const EMERGENCY_DUMP_GLOB: &str = "NoteNest_Recovery_*.txt";

#[derive(Debug, Default, Clone)]
pub struct RecoverySummary {
    pub recovered: Vec<PathBuf>,
    pub backups_created: Vec<PathBuf>,
    pub temps_cleaned: Vec<PathBuf>,
    pub emergency_dumps: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct StartupRecovery<F: FileSystem> {
    fs: std::sync::Arc<F>,
    notes_root: PathBuf,
    desktop_dir: Option<PathBuf>,
}

impl<F: FileSystem> StartupRecovery<F> {
    pub fn new(fs: std::sync::Arc<F>, notes_root: PathBuf) -> Self {
        Self {
            fs,
            notes_root,
            desktop_dir: dirs::desktop_dir(),
        }
    }

    pub fn with_desktop_dir(mut self, desktop_dir: PathBuf) -> Self {
        self.desktop_dir = Some(desktop_dir);
        self
    }

    pub async fn run(&self) -> RecoverySummary {
        let mut summary = RecoverySummary::default();

        self.reconcile_temp_files(&mut summary).await;
        self.enumerate_emergency_dumps(&mut summary).await;
        self.age_out_backups(&mut summary).await;

        summary
    }

    async fn reconcile_temp_files(&self, summary: &mut RecoverySummary) {
        let entries = walk_recursive(self.fs.as_ref(), &self.notes_root, Some(TMP_GLOB)).await;
        for entry in entries {
            if entry.is_dir {
                continue;
            }
            if let Err(e) = self.reconcile_one_temp(&entry.path, summary).await {
                summary.failed.push((entry.path.clone(), e));
            }
        }
    }

    async fn reconcile_one_temp(&self, tmp: &Path, summary: &mut RecoverySummary) -> Result<(), String> {
        let orig = strip_tmp_extension(tmp);
        let orig_exists = self.fs.exists(&orig).await.map_err(|e| e.to_string())?;

        if !orig_exists {
            self.fs.rename(tmp, &orig, true).await.map_err(|e| e.to_string())?;
            summary.recovered.push(orig);
            return Ok(());
        }

        let tmp_mtime = self.fs.get_mtime(tmp).await.map_err(|e| e.to_string())?;
        let orig_mtime = self.fs.get_mtime(&orig).await.map_err(|e| e.to_string())?;
        let tmp_size = self.fs.get_size(tmp).await.map_err(|e| e.to_string())?;

        if tmp_mtime > orig_mtime && tmp_size > 0 {
            let backup_path = backup_path_for(&orig);
            let original_bytes = self.fs.read_bytes(&orig).await.map_err(|e| e.to_string())?;
            self.fs
                .write_bytes(&backup_path, &original_bytes)
                .await
                .map_err(|e| e.to_string())?;
            summary.backups_created.push(backup_path);

            self.fs.rename(tmp, &orig, true).await.map_err(|e| e.to_string())?;
            summary.recovered.push(orig);
        } else {
            self.fs.delete(tmp).await.map_err(|e| e.to_string())?;
            summary.temps_cleaned.push(tmp.to_path_buf());
        }

        Ok(())
    }

    async fn enumerate_emergency_dumps(&self, summary: &mut RecoverySummary) {
        let Some(desktop) = &self.desktop_dir else { return };
        match self.fs.list(desktop, Some(EMERGENCY_DUMP_GLOB)).await {
            Ok(entries) => {
                for entry in entries.into_iter().filter(|e| !e.is_dir) {
                    summary.emergency_dumps.push(entry.path);
                }
            }
            Err(e) => {
                // Desktop dir not existing is common (headless CI, containers)
                // and is not itself a recovery failure.
                tracing::debug!("emergency dump scan skipped for {}: {e}", desktop.display());
            }
        }
    }

    async fn age_out_backups(&self, summary: &mut RecoverySummary) {
        let entries = walk_recursive(self.fs.as_ref(), &self.notes_root, Some(BACKUP_GLOB)).await;

        let now = SystemTime::now();
        for entry in entries.into_iter().filter(|e| !e.is_dir) {
            let age = match self.fs.get_mtime(&entry.path).await {
                Ok(mtime) => now.duration_since(mtime).unwrap_or_default(),
                Err(e) => {
                    summary.failed.push((entry.path.clone(), e.to_string()));
                    continue;
                }
            };
            if age > BACKUP_RETENTION {
                if let Err(e) = self.fs.delete(&entry.path).await {
                    summary.failed.push((entry.path.clone(), e.to_string()));
                } else {
                    summary.temps_cleaned.push(entry.path);
                }
            }
        }
    }
}

/// Strips a trailing `.atomic.tmp` or plain `.tmp` suffix. Both mark an
/// in-progress write. The longer suffix must be tried first:
/// `foo.rtf.atomic.tmp` strips to `foo.rtf`, not `foo.rtf.atomic`.
fn strip_tmp_extension(tmp: &Path) -> PathBuf {
    let name = tmp.to_string_lossy();
    if let Some(stripped) = name.strip_suffix(".atomic.tmp") {
        return PathBuf::from(stripped);
    }
    PathBuf::from(name.strip_suffix(".tmp").unwrap_or(&name))
}

fn backup_path_for(orig: &Path) -> PathBuf {
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let mut os = orig.as_os_str().to_owned();
    os.push(format!(".backup_{timestamp}"));
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notes_core::fs::InMemoryFs;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn promotes_orphaned_temp_with_no_original() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_bytes(Path::new("/notes/a.rtf.tmp"), b"recovered")
            .await
            .unwrap();

        let recovery = StartupRecovery::new(Arc::clone(&fs), PathBuf::from("/notes"))
            .with_desktop_dir(PathBuf::from("/desktop"));
        let summary = recovery.run().await;

        assert_eq!(summary.recovered, vec![PathBuf::from("/notes/a.rtf")]);
        assert_eq!(fs.read_bytes(Path::new("/notes/a.rtf")).await.unwrap(), b"recovered");
    }

    #[tokio::test]
    async fn discards_stale_temp_older_than_original() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_bytes(Path::new("/notes/a.rtf"), b"current").await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        fs.write_bytes(Path::new("/notes/a.rtf.tmp"), b"").await.unwrap();
        fs.set_mtime(Path::new("/notes/a.rtf.tmp"), SystemTime::UNIX_EPOCH);

        let recovery = StartupRecovery::new(Arc::clone(&fs), PathBuf::from("/notes"))
            .with_desktop_dir(PathBuf::from("/desktop"));
        let summary = recovery.run().await;

        assert_eq!(summary.temps_cleaned, vec![PathBuf::from("/notes/a.rtf.tmp")]);
        assert_eq!(fs.read_bytes(Path::new("/notes/a.rtf")).await.unwrap(), b"current");
    }

    #[tokio::test]
    async fn promotes_newer_nonempty_temp_with_backup() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_bytes(Path::new("/notes/a.rtf"), b"old").await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        fs.write_bytes(Path::new("/notes/a.rtf.tmp"), b"new").await.unwrap();

        let recovery = StartupRecovery::new(Arc::clone(&fs), PathBuf::from("/notes"))
            .with_desktop_dir(PathBuf::from("/desktop"));
        let summary = recovery.run().await;

        assert_eq!(summary.recovered, vec![PathBuf::from("/notes/a.rtf")]);
        assert_eq!(summary.backups_created.len(), 1);
        assert_eq!(fs.read_bytes(Path::new("/notes/a.rtf")).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn promotes_orphaned_temp_nested_in_category_subdirectory() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_bytes(Path::new("/notes/Ideas/Sub/a.rtf.tmp"), b"recovered")
            .await
            .unwrap();

        let recovery = StartupRecovery::new(Arc::clone(&fs), PathBuf::from("/notes"))
            .with_desktop_dir(PathBuf::from("/desktop"));
        let summary = recovery.run().await;

        assert_eq!(summary.recovered, vec![PathBuf::from("/notes/Ideas/Sub/a.rtf")]);
    }

    #[tokio::test]
    async fn promotes_orphaned_atomic_tmp_stripping_the_full_suffix() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_bytes(Path::new("/notes/a.rtf.atomic.tmp"), b"recovered")
            .await
            .unwrap();

        let recovery = StartupRecovery::new(Arc::clone(&fs), PathBuf::from("/notes"))
            .with_desktop_dir(PathBuf::from("/desktop"));
        let summary = recovery.run().await;

        assert_eq!(summary.recovered, vec![PathBuf::from("/notes/a.rtf")]);
    }

    #[tokio::test]
    async fn surfaces_emergency_dumps_without_merging() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_bytes(Path::new("/desktop/NoteNest_Recovery_lost_20260101000000.txt"), b"dump")
            .await
            .unwrap();

        let recovery = StartupRecovery::new(Arc::clone(&fs), PathBuf::from("/notes"))
            .with_desktop_dir(PathBuf::from("/desktop"));
        let summary = recovery.run().await;

        assert_eq!(
            summary.emergency_dumps,
            vec![PathBuf::from("/desktop/NoteNest_Recovery_lost_20260101000000.txt")]
        );
    }

    #[tokio::test]
    async fn ages_out_old_backups() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write_bytes(Path::new("/notes/a.rtf.backup_20200101000000"), b"old")
            .await
            .unwrap();
        fs.set_mtime(
            Path::new("/notes/a.rtf.backup_20200101000000"),
            SystemTime::UNIX_EPOCH,
        );

        let recovery = StartupRecovery::new(Arc::clone(&fs), PathBuf::from("/notes"))
            .with_desktop_dir(PathBuf::from("/desktop"));
        let summary = recovery.run().await;

        assert!(summary.temps_cleaned.contains(&PathBuf::from("/notes/a.rtf.backup_20200101000000")));
        assert!(!fs.exists(Path::new("/notes/a.rtf.backup_20200101000000")).await.unwrap());
    }
}
