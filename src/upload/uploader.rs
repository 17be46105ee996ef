//! Concurrent Uploader
//!
//! Uploads finished stream files with a bounded number of puts in flight.
//!
//! ## Architecture
//!
//! ```text
//! upload_all(tasks)
//!   ├─ spawn task 1 ─→ acquire permit ─→ retry(put | put_multipart) ─→ remove file
//!   ├─ spawn task 2 ─→ acquire permit ─→ ...
//!   └─ spawn task N ─→ (waits until a permit frees up)
//!
//! Semaphore(concurrency_max) caps concurrent puts.
//! ```
//!
//! Files up to `multipart_threshold` are read whole and sent in one put.
//! Larger files are streamed from disk in parts, so memory per upload stays
//! bounded by the part size and objects may exceed the single-put limit.
//!
//! The first failed upload aborts the batch; uploads still running at that
//! point are cancelled and objects already written stay in place.

use crate::upload::encryption::Encryption;
use crate::upload::object_store::{ObjectStore, ObjectStoreError};
use crate::upload::retry::{retry_with_backoff, RetryPolicy};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Default cap on concurrent uploads
pub const DEFAULT_CONCURRENCY_MAX: usize = 1000;

/// Files above this size are uploaded in parts
pub const DEFAULT_MULTIPART_THRESHOLD: usize = 8 * 1024 * 1024;

/// Default multipart part size, above the S3 minimum of 5 MiB
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 limit on parts per multipart upload
pub const MULTIPART_PARTS_MAX: u64 = 10_000;

/// One finished stream file awaiting upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub stream: String,
    pub local_path: PathBuf,
    pub remote_key: String,
}

/// Upload errors
#[derive(Debug)]
pub enum UploadError {
    /// Reading or removing the local file failed
    Io { path: PathBuf, source: std::io::Error },
    /// The store rejected the put, after retries where applicable
    Store { key: String, source: ObjectStoreError },
    /// An upload task panicked or was cancelled
    Task(String),
}

impl UploadError {
    /// Whether the failure may clear up on retry
    pub fn is_transient(&self) -> bool {
        match self {
            UploadError::Store { source, .. } => source.is_transient(),
            UploadError::Io { .. } | UploadError::Task(_) => false,
        }
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Io { path, source } => {
                write!(f, "Upload I/O error on {}: {}", path.display(), source)
            }
            UploadError::Store { key, source } => write!(f, "Failed to upload {}: {}", key, source),
            UploadError::Task(msg) => write!(f, "Upload task failed: {}", msg),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Io { source, .. } => Some(source),
            UploadError::Store { source, .. } => Some(source),
            UploadError::Task(_) => None,
        }
    }
}

/// Uploader settings
#[derive(Debug, Clone)]
pub struct UploaderOptions {
    /// Maximum concurrent puts, at least 1
    pub concurrency_max: usize,
    pub retry: RetryPolicy,
    /// Delete each local file once its upload succeeds
    pub remove_local_files: bool,
    /// Skip uploading entirely and keep files on disk
    pub local: bool,
    /// Logged with each upload; applied by the store's client
    pub encryption: Encryption,
    /// Largest file sent as a single put
    pub multipart_threshold: usize,
    /// Part size for larger files, raised when the file needs more than
    /// `MULTIPART_PARTS_MAX` parts
    pub part_size: usize,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        UploaderOptions {
            concurrency_max: DEFAULT_CONCURRENCY_MAX,
            retry: RetryPolicy::default(),
            remove_local_files: true,
            local: false,
            encryption: Encryption::None,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// Part size keeping a `len`-byte file within `MULTIPART_PARTS_MAX` parts
pub fn part_size_for(len: u64, part_size: usize) -> usize {
    let part_size = part_size.max(1);
    let needed = len.div_ceil(MULTIPART_PARTS_MAX);
    usize::try_from(needed).map_or(usize::MAX, |needed| part_size.max(needed))
}

/// Outcome of one `upload_all`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Remote keys written
    pub uploaded: Vec<String>,
    /// Tasks skipped for a missing or empty file, or local mode
    pub skipped: usize,
    pub bytes: u64,
}

/// What happened to a single task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { key: String, bytes: u64 },
    Skipped,
}

/// Shared uploader; clones share the store and the concurrency limit
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    options: Arc<UploaderOptions>,
    semaphore: Arc<Semaphore>,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, options: UploaderOptions) -> Self {
        let permits = options.concurrency_max.clamp(1, Semaphore::MAX_PERMITS);
        Uploader {
            store,
            options: Arc::new(options),
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn options(&self) -> &UploaderOptions {
        &self.options
    }

    /// Upload one file without taking a concurrency permit
    pub async fn upload(&self, task: &UploadTask) -> Result<UploadOutcome, UploadError> {
        let io_error = |source: std::io::Error| UploadError::Io {
            path: task.local_path.clone(),
            source,
        };
        let bytes = match tokio::fs::metadata(&task.local_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No file for stream {} at {}, skipping", task.stream, task.local_path.display());
                return Ok(UploadOutcome::Skipped);
            }
            Err(source) => return Err(io_error(source)),
        };
        if bytes == 0 {
            debug!("Empty file for stream {}, skipping", task.stream);
            return Ok(UploadOutcome::Skipped);
        }

        // Small files are read once and resent from memory on retry
        let body = if bytes > self.options.multipart_threshold as u64 {
            None
        } else {
            let data = tokio::fs::read(&task.local_path).await.map_err(io_error)?;
            Some(Bytes::from(data))
        };
        let part_size = part_size_for(bytes, self.options.part_size);

        let destination = format!("{}/{}", self.store.location().trim_end_matches('/'), task.remote_key);
        info!(
            "Uploading {} to {}{}",
            task.local_path.display(),
            destination,
            self.options.encryption.description()
        );
        if body.is_none() {
            debug!("Streaming {} bytes in parts of {} bytes", bytes, part_size);
        }

        let store = &self.store;
        let key = &task.remote_key;
        let path = task.local_path.as_path();
        retry_with_backoff(&self.options.retry, UploadError::is_transient, || {
            let body = body.clone();
            async move {
                let result = match body {
                    Some(data) => store.put(key, data).await,
                    None => store.put_multipart(key, path, part_size).await.map(|_| ()),
                };
                result.map_err(|source| UploadError::Store {
                    key: key.clone(),
                    source,
                })
            }
        })
        .await?;

        if self.options.remove_local_files {
            tokio::fs::remove_file(&task.local_path)
                .await
                .map_err(|source| UploadError::Io {
                    path: task.local_path.clone(),
                    source,
                })?;
        }

        info!("Uploaded {} ({} bytes)", destination, bytes);
        Ok(UploadOutcome::Uploaded {
            key: task.remote_key.clone(),
            bytes,
        })
    }

    /// Upload every task concurrently, at most `concurrency_max` at a time.
    ///
    /// In local mode nothing is uploaded and every file is left in place.
    pub async fn upload_all(&self, tasks: Vec<UploadTask>) -> Result<UploadSummary, UploadError> {
        let mut summary = UploadSummary::default();

        if self.options.local {
            info!("Local mode, leaving {} files on disk", tasks.len());
            summary.skipped = tasks.len();
            return Ok(summary);
        }

        let mut join_set = JoinSet::new();
        for task in tasks {
            let uploader = self.clone();
            join_set.spawn(async move {
                let _permit = uploader
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| UploadError::Task(e.to_string()))?;
                uploader.upload(&task).await
            });
        }

        // Dropping the set on error aborts the remaining uploads.
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined.map_err(|e| UploadError::Task(e.to_string()))??;
            match outcome {
                UploadOutcome::Uploaded { key, bytes } => {
                    summary.uploaded.push(key);
                    summary.bytes += bytes;
                }
                UploadOutcome::Skipped => summary.skipped += 1,
            }
        }

        summary.uploaded.sort();
        Ok(summary)
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("location", &self.store.location())
            .field("options", &self.options)
            .field("available_permits", &self.semaphore.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::object_store::InMemoryObjectStore;
    use crate::upload::simulated_store::{SimulatedObjectStore, SimulatedStoreConfig};
    use tempfile::{tempdir, TempDir};

    fn options() -> UploaderOptions {
        UploaderOptions {
            retry: RetryPolicy::test(),
            ..UploaderOptions::default()
        }
    }

    fn write_task(dir: &TempDir, stream: &str, contents: &[u8]) -> UploadTask {
        let local_path = dir.path().join(format!("{}.json", stream));
        std::fs::write(&local_path, contents).unwrap();
        UploadTask {
            stream: stream.to_string(),
            local_path,
            remote_key: format!("out/{}.json", stream),
        }
    }

    #[tokio::test]
    async fn test_upload_removes_local_file() {
        let dir = tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let uploader = Uploader::new(Arc::new(store.clone()), options());

        let task = write_task(&dir, "users", b"{\"id\":1}\n");
        let outcome = uploader.upload(&task).await.unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                key: "out/users.json".to_string(),
                bytes: 9
            }
        );
        assert_eq!(store.object("out/users.json").unwrap(), Bytes::from_static(b"{\"id\":1}\n"));
        assert!(!task.local_path.exists());
    }

    #[tokio::test]
    async fn test_keep_local_files() {
        let dir = tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let uploader = Uploader::new(
            Arc::new(store.clone()),
            UploaderOptions {
                remove_local_files: false,
                ..options()
            },
        );

        let task = write_task(&dir, "users", b"x\n");
        uploader.upload(&task).await.unwrap();
        assert!(task.local_path.exists());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_empty_files_are_skipped() {
        let dir = tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let uploader = Uploader::new(Arc::new(store.clone()), options());

        let empty = write_task(&dir, "empty", b"");
        let missing = UploadTask {
            stream: "missing".to_string(),
            local_path: dir.path().join("missing.json"),
            remote_key: "missing.json".to_string(),
        };
        let full = write_task(&dir, "full", b"{}\n");

        let summary = uploader.upload_all(vec![empty, missing, full]).await.unwrap();
        assert_eq!(summary.uploaded, vec!["out/full.json".to_string()]);
        assert_eq!(summary.skipped, 2);
        assert_eq!(store.keys(), vec!["out/full.json".to_string()]);
    }

    #[tokio::test]
    async fn test_local_mode_uploads_nothing() {
        let dir = tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let uploader = Uploader::new(
            Arc::new(store.clone()),
            UploaderOptions {
                local: true,
                ..options()
            },
        );

        let task = write_task(&dir, "users", b"{}\n");
        let summary = uploader.upload_all(vec![task.clone()]).await.unwrap();

        assert!(summary.uploaded.is_empty());
        assert_eq!(summary.skipped, 1);
        assert!(store.is_empty());
        assert!(task.local_path.exists());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = tempdir().unwrap();
        let store = SimulatedObjectStore::new(InMemoryObjectStore::new(), SimulatedStoreConfig::flaky(3));
        let uploader = Uploader::new(Arc::new(store.clone()), options());

        let task = write_task(&dir, "users", b"{}\n");
        uploader.upload(&task).await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.put_attempts, 4);
        assert_eq!(stats.put_successes, 1);
        assert!(!task.local_path.exists());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_keeps_file() {
        let dir = tempdir().unwrap();
        let store = SimulatedObjectStore::new(InMemoryObjectStore::new(), SimulatedStoreConfig::flaky(10));
        let uploader = Uploader::new(Arc::new(store.clone()), options());

        let task = write_task(&dir, "users", b"{}\n");
        let err = uploader.upload_all(vec![task.clone()]).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(store.stats().put_attempts, 5);
        assert!(task.local_path.exists());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let dir = tempdir().unwrap();
        let store = SimulatedObjectStore::new(InMemoryObjectStore::new(), SimulatedStoreConfig::denied());
        let uploader = Uploader::new(Arc::new(store.clone()), options());

        let task = write_task(&dir, "users", b"{}\n");
        let err = uploader.upload(&task).await.unwrap_err();

        assert!(matches!(
            err,
            UploadError::Store {
                source: ObjectStoreError::PermissionDenied(_),
                ..
            }
        ));
        assert_eq!(store.stats().put_attempts, 1);
    }

    #[tokio::test]
    async fn test_large_file_is_streamed_in_parts() {
        let dir = tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let uploader = Uploader::new(
            Arc::new(store.clone()),
            UploaderOptions {
                multipart_threshold: 16,
                part_size: 8,
                ..options()
            },
        );

        let contents = b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n{\"id\":4}\n";
        let task = write_task(&dir, "users", contents);
        let outcome = uploader.upload(&task).await.unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                key: "out/users.json".to_string(),
                bytes: 36
            }
        );
        assert_eq!(store.object("out/users.json").unwrap(), Bytes::from_static(contents));
        assert_eq!(store.part_count("out/users.json"), Some(5));
        assert!(!task.local_path.exists());
    }

    #[tokio::test]
    async fn test_file_at_threshold_uses_single_put() {
        let dir = tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let uploader = Uploader::new(
            Arc::new(store.clone()),
            UploaderOptions {
                multipart_threshold: 9,
                part_size: 4,
                ..options()
            },
        );

        let task = write_task(&dir, "users", b"{\"id\":1}\n");
        uploader.upload(&task).await.unwrap();
        assert_eq!(store.part_count("out/users.json"), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_streamed_upload_is_retried_whole() {
        let dir = tempdir().unwrap();
        let store = SimulatedObjectStore::new(InMemoryObjectStore::new(), SimulatedStoreConfig::flaky(2));
        let uploader = Uploader::new(
            Arc::new(store.clone()),
            UploaderOptions {
                multipart_threshold: 4,
                part_size: 4,
                ..options()
            },
        );

        let task = write_task(&dir, "users", b"0123456789");
        uploader.upload(&task).await.unwrap();

        assert_eq!(store.stats().put_attempts, 3);
        assert_eq!(store.inner().object("out/users.json").unwrap(), Bytes::from_static(b"0123456789"));
        assert_eq!(store.inner().part_count("out/users.json"), Some(3));
    }

    #[test]
    fn test_part_size_grows_for_huge_files() {
        assert_eq!(part_size_for(1024, DEFAULT_PART_SIZE), DEFAULT_PART_SIZE);

        let huge = 200 * 1024 * 1024 * 1024u64;
        let part_size = part_size_for(huge, DEFAULT_PART_SIZE);
        assert!(part_size > DEFAULT_PART_SIZE);
        assert!(huge.div_ceil(part_size as u64) <= MULTIPART_PARTS_MAX);
    }

    #[test]
    fn test_oversized_concurrency_is_clamped() {
        let uploader = Uploader::new(
            Arc::new(InMemoryObjectStore::new()),
            UploaderOptions {
                concurrency_max: usize::MAX,
                ..options()
            },
        );
        assert_eq!(uploader.semaphore.available_permits(), Semaphore::MAX_PERMITS);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let dir = tempdir().unwrap();
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedStoreConfig::no_faults().with_latency_ms(5, 15),
        );
        let uploader = Uploader::new(
            Arc::new(store.clone()),
            UploaderOptions {
                concurrency_max: 3,
                ..options()
            },
        );

        let tasks: Vec<UploadTask> = (0..20)
            .map(|i| write_task(&dir, &format!("stream_{}", i), b"{}\n"))
            .collect();
        let summary = uploader.upload_all(tasks).await.unwrap();

        assert_eq!(summary.uploaded.len(), 20);
        let stats = store.stats();
        assert!(stats.max_in_flight <= 3, "max in flight {}", stats.max_in_flight);
        assert!(stats.max_in_flight >= 1);
        assert_eq!(stats.in_flight, 0);
    }
}
