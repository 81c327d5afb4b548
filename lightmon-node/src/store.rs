//! Result log persistence.
//!
//! The log is stored as its fixed-size blob in one file. Writes go to a
//! temporary sibling first and are renamed into place, so a crash never
//! leaves a half-written blob behind.

use std::path::{Path, PathBuf};

use lightmon_core::ResultLog;
use thiserror::Error;
use tracing::{debug, warn};

/// File name used inside a node's data directory.
pub const LOG_FILE_NAME: &str = "result_log.bin";

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("log store i/o error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// File-backed store for one node's result log.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    /// Store at an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`LOG_FILE_NAME`] inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOG_FILE_NAME))
    }

    /// File path of the blob.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved log.
    ///
    /// A missing file yields an empty log. A corrupt file is logged and also
    /// yields an empty log, so a damaged blob never stops the node.
    pub async fn load(&self) -> Result<ResultLog, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved result log");
                return Ok(ResultLog::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match ResultLog::from_bytes(&bytes) {
            Ok(log) => {
                debug!(path = %self.path.display(), entries = log.written_count(), "result log loaded");
                Ok(log)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding corrupt result log");
                Ok(ResultLog::new())
            }
        }
    }

    /// Persist the log, replacing the previous blob.
    pub async fn save(&self, log: &ResultLog) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, log.to_bytes())
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightmon_core::ResultEntry;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_yields_empty_log() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::in_dir(dir.path());

        let log = store.load().await.unwrap();
        assert_eq!(log, ResultLog::new());
    }

    #[tokio::test]
    async fn save_then_load_restores_log() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::in_dir(&dir.path().join("node-5"));

        let mut log = ResultLog::new();
        log.append(ResultEntry::new(true, 1000));
        log.append(ResultEntry::new(false, 2000));
        store.save(&log).await.unwrap();

        let restored = store.load().await.unwrap();
        assert_eq!(restored, log);
        assert_eq!(restored.last_index(), 2);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_yields_empty_log() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::in_dir(dir.path());
        tokio::fs::write(store.path(), b"not a log").await.unwrap();

        let log = store.load().await.unwrap();
        assert_eq!(log, ResultLog::new());
    }

    #[tokio::test]
    async fn out_of_range_index_is_treated_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::in_dir(dir.path());
        let mut blob = ResultLog::new().to_bytes();
        blob[blob.len() - 1] = 9;
        tokio::fs::write(store.path(), blob).await.unwrap();

        assert_eq!(store.load().await.unwrap(), ResultLog::new());
    }
}
