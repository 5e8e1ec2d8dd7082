//! Runtime configuration, loaded from a TOML file with `serde(default)` so
//! a partial or missing file still yields a usable configuration. Follows
//! the same `load_from`/tilde-expansion shape the
//! corpus uses for its own config layers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotesConfig {
    /// Root directory scanned by the file watcher and recovered on startup.
    /// Supports a leading `~` for the user's home directory.
    pub notes_root_path: PathBuf,

    /// Auto-save period, in seconds.
    pub auto_save_interval_secs: u64,
    /// WAL-flush period, in seconds.
    pub wal_flush_interval_secs: u64,

    /// Ordered backoff delays for the save coordinator's retry loop, in milliseconds.
    pub save_retry_delays_ms: Vec<u64>,
    /// Max concurrent saves in a batch.
    pub batch_concurrency_limit: usize,
    /// Delay before un-suspending a watched path after a write, in milliseconds.
    pub watcher_resume_delay_ms: u64,

    /// File extensions (without the leading dot) eligible for indexing.
    pub indexed_extensions: Vec<String>,
    /// Upper bound, in bytes, for indexing a single file.
    pub max_indexed_file_size: u64,
    /// Substrings that disqualify a path from indexing.
    pub excluded_directories: Vec<String>,
    /// LRU capacity for search preview snippets.
    pub preview_cache_capacity: usize,

    /// Age threshold, in days, for backup cleanup during startup recovery.
    pub backup_retention_days: u64,
    /// Continuous projection catch-up cadence, in seconds.
    pub projection_poll_interval_secs: u64,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            notes_root_path: PathBuf::from("~/Notes"),
            auto_save_interval_secs: 30,
            wal_flush_interval_secs: 10,
            save_retry_delays_ms: vec![100, 500, 1500],
            batch_concurrency_limit: 3,
            watcher_resume_delay_ms: 750,
            indexed_extensions: vec!["rtf".into(), "md".into(), "txt".into()],
            max_indexed_file_size: 10 * 1024 * 1024,
            excluded_directories: vec![".notes".into(), ".git".into()],
            preview_cache_capacity: 50,
            backup_retention_days: 7,
            projection_poll_interval_secs: 5,
        }
    }
}

impl NotesConfig {
    /// Loads configuration from `path`, falling back to defaults for any
    /// field the file omits. Missing files yield `Ok(Self::default())`
    /// rather than an error, matching the corpus's permissive config load.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.notes_root_path = expand_tilde(&config.notes_root_path);
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn auto_save_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auto_save_interval_secs)
    }

    pub fn wal_flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.wal_flush_interval_secs)
    }

    pub fn watcher_resume_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.watcher_resume_delay_ms)
    }

    pub fn projection_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.projection_poll_interval_secs)
    }
}

/// Expands a leading `~` or `~/` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        dirs::home_dir().unwrap_or_else(|| path.to_path_buf())
    } else if let Some(rest) = s.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf())
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.toml");
        let config = NotesConfig::load_from(&path).unwrap();
        assert_eq!(config, NotesConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.toml");
        std::fs::write(&path, "batch_concurrency_limit = 7\n").unwrap();

        let config = NotesConfig::load_from(&path).unwrap();
        assert_eq!(config.batch_concurrency_limit, 7);
        assert_eq!(config.auto_save_interval_secs, 30);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.toml");

        let mut config = NotesConfig::default();
        config.notes_root_path = PathBuf::from("/tmp/some-vault");
        config.save_to(&path).unwrap();

        let restored = NotesConfig::load_from(&path).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn expands_tilde_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.toml");
        std::fs::write(&path, "notes_root_path = \"~/Notes\"\n").unwrap();

        let config = NotesConfig::load_from(&path).unwrap();
        assert_ne!(config.notes_root_path, PathBuf::from("~/Notes"));
    }
}
