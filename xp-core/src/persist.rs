//! Durable storage of progression records.
//!
//! The whole user to record mapping lives in a single pretty-printed JSON
//! document. Writes are serialized behind one async lock, go to a sibling
//! temporary file first and are then renamed over the document, so a
//! reader never sees a half-written file.

use crate::cache::Records;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Save to {path} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: PathBuf,
        attempts: u32,
        last: String,
    },
}

/// How failed writes are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,

    /// Delay before the second attempt; doubles after each failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// JSON document store for progression records.
#[derive(Debug)]
pub struct ProgressionStore {
    path: PathBuf,
    retry: RetryPolicy,
    write_lock: Mutex<()>,
}

impl ProgressionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::default(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            attempts: retry.attempts.max(1),
            backoff: retry.backoff,
        };
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted records.
    ///
    /// A missing document is created empty, along with its directory. An
    /// empty file counts as no records. A document that is not UTF-8 or
    /// fails to parse is discarded with a warning and overwritten with an
    /// empty one. Other read errors are returned.
    pub async fn load(&self) -> Result<Records, PersistError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    path = %self.path.display(),
                    "no progression document, creating an empty one"
                );
                self.heal().await;
                return Ok(Records::new());
            }
            Err(e) => return Err(e.into()),
        };

        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(e) => return Ok(self.discard_corrupted(&e).await),
        };

        if content.trim().is_empty() {
            return Ok(Records::new());
        }

        match serde_json::from_str::<Records>(&content) {
            Ok(records) => Ok(records),
            Err(e) => Ok(self.discard_corrupted(&e).await),
        }
    }

    async fn discard_corrupted(&self, cause: &(dyn std::error::Error + Send + Sync)) -> Records {
        warn!(
            path = %self.path.display(),
            error = %cause,
            "progression document is corrupted, discarding its content"
        );
        self.heal().await;
        Records::new()
    }

    /// Write an empty document in place of a missing or corrupted one.
    async fn heal(&self) {
        if let Err(e) = self.save(&Records::new()).await {
            error!(
                path = %self.path.display(),
                error = %e,
                "could not write empty progression document"
            );
        }
    }

    /// Overwrite the document with `records`.
    ///
    /// At most one save runs at a time; concurrent callers queue on the
    /// store's write lock.
    pub async fn save(&self, records: &Records) -> Result<(), PersistError> {
        let _guard = self.write_lock.lock().await;
        self.write_with_retry(records).await
    }

    /// Take the write lock, then build the snapshot and write it.
    ///
    /// Snapshotting under the lock means the save that finishes last always
    /// carries the newest state, even when several saves were requested
    /// concurrently.
    pub async fn save_latest<F, Fut>(&self, snapshot: F) -> Result<(), PersistError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Records>,
    {
        let _guard = self.write_lock.lock().await;
        let records = snapshot().await;
        self.write_with_retry(&records).await
    }

    async fn write_with_retry(&self, records: &Records) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(records)?;
        let mut delay = self.retry.backoff;
        let mut attempt = 1;

        loop {
            match self.write_atomic(&content).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.retry.attempts => {
                    error!(
                        path = %self.path.display(),
                        attempts = attempt,
                        error = %e,
                        "giving up on progression save"
                    );
                    return Err(PersistError::RetriesExhausted {
                        path: self.path.clone(),
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "progression save failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    async fn write_atomic(&self, content: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, content).await?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProgressionRecord, UserId};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample() -> Records {
        let mut records = Records::new();
        records.insert(UserId::from("111"), ProgressionRecord::new(40, 3, 0));
        records.insert(UserId::from("222"), ProgressionRecord::new(0, 1, 2));
        records
    }

    #[tokio::test]
    async fn test_missing_document_is_created_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        let store = ProgressionStore::new(&path);

        let records = store.load().await.expect("Load should succeed");

        assert!(records.is_empty());
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = ProgressionStore::new(temp_dir.path().join("xp_data.json"));

        store.save(&sample()).await.expect("Save should succeed");
        let loaded = store.load().await.expect("Load should succeed");

        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_save_of_loaded_document_is_byte_identical() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        let store = ProgressionStore::new(&path);

        store.save(&sample()).await.expect("Save should succeed");
        let before = std::fs::read_to_string(&path).unwrap();

        let loaded = store.load().await.expect("Load should succeed");
        store.save(&loaded).await.expect("Save should succeed");
        let after = std::fs::read_to_string(&path).unwrap();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_corrupted_document_is_healed() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        std::fs::write(&path, "{\"111\": {\"experience\": 4").unwrap();
        let store = ProgressionStore::new(&path);

        let records = store.load().await.expect("Corruption should not be fatal");

        assert!(records.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_wrong_shape_counts_as_corruption() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let store = ProgressionStore::new(&path);

        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_empty_file_is_empty_mapping() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        std::fs::write(&path, "  \n").unwrap();
        let store = ProgressionStore::new(&path);

        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_document_loads() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        std::fs::write(
            &path,
            r#"{"111": {"xp": 12, "level": 2}, "222": {"xp": 0, "level": 1}}"#,
        )
        .unwrap();
        let store = ProgressionStore::new(&path);

        let records = store.load().await.unwrap();
        assert_eq!(
            records.get(&UserId::from("111")),
            Some(&ProgressionRecord::new(12, 2, 0))
        );
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        let store = ProgressionStore::new(&path);

        store.save(&sample()).await.unwrap();

        assert!(!temp_dir.path().join("xp_data.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_non_utf8_document_is_healed() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x7b]).unwrap();
        let store = ProgressionStore::new(&path);

        let records = store.load().await.expect("Corruption should not be fatal");

        assert!(records.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_missing_directories_are_created() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data").join("nested").join("xp_data.json");
        let store = ProgressionStore::new(&path);

        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");

        store.save(&sample()).await.expect("Save should succeed");
        assert_eq!(store.load().await.unwrap(), sample());
    }

    #[tokio::test]
    async fn test_unwritable_location_exhausts_retries() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        // A plain file where the parent directory should be
        let blocker = temp_dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = ProgressionStore::new(blocker.join("xp_data.json")).with_retry(RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        });

        let err = store.save(&sample()).await.unwrap_err();
        assert!(matches!(
            err,
            PersistError::RetriesExhausted { attempts: 2, .. }
        ));

        // A failed save must release the lock for the next caller
        std::fs::remove_file(&blocker).unwrap();
        store.save(&sample()).await.expect("Save should succeed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_never_corrupt() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xp_data.json");
        let store = Arc::new(ProgressionStore::new(&path));

        let mut handles = Vec::new();
        for writer in 0..16u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut records = Records::new();
                for n in 0..=writer {
                    records.insert(UserId::from(n), ProgressionRecord::new(n, 1, 0));
                }
                store.save(&records).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().expect("Save should succeed");
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Records = serde_json::from_str(&content).expect("Document must parse");
        assert!(!parsed.is_empty());
    }
}
