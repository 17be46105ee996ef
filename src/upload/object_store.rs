//! Object Store Abstraction
//!
//! The uploader puts small files as one object and streams large ones from
//! disk in parts; reads exist so tests can inspect what was stored.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit and integration tests
//! - `SimulatedObjectStore`: Fault-injecting wrapper for retry and concurrency tests
//! - `S3ObjectStore`: For production

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Error type for object store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    /// Object not found
    NotFound(String),
    /// Credentials rejected or missing
    PermissionDenied(String),
    /// Network or service failure that may succeed on retry
    Transient(String),
    /// Other errors
    Other(String),
}

impl ObjectStoreError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ObjectStoreError::Transient(_))
    }
}

impl std::fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectStoreError::NotFound(key) => write!(f, "Object not found: {}", key),
            ObjectStoreError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            ObjectStoreError::Transient(msg) => write!(f, "Transient object store error: {}", msg),
            ObjectStoreError::Other(msg) => write!(f, "Object store error: {}", msg),
        }
    }
}

impl std::error::Error for ObjectStoreError {}

impl From<IoError> for ObjectStoreError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => ObjectStoreError::NotFound(e.to_string()),
            ErrorKind::PermissionDenied => ObjectStoreError::PermissionDenied(e.to_string()),
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => ObjectStoreError::Transient(e.to_string()),
            _ => ObjectStoreError::Other(e.to_string()),
        }
    }
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ObjectStoreError>> + Send + 'a>>;

/// Object store abstraction trait
///
/// Implementations must be safe to share between concurrent uploads.
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object (create or overwrite)
    fn put<'a>(&'a self, key: &'a str, data: Bytes) -> StoreFuture<'a, ()>;

    /// Stream the file at `path` to `key` in parts of `part_size` bytes,
    /// holding at most a few parts in memory. Returns the bytes uploaded.
    fn put_multipart<'a>(&'a self, key: &'a str, path: &'a Path, part_size: usize) -> StoreFuture<'a, u64>;

    /// Get an object's contents
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Bytes>;

    /// Human-readable destination root, e.g. `s3://bucket`
    fn location(&self) -> String;
}

// ============================================================================
// InMemoryObjectStore - For tests
// ============================================================================

/// In-memory object store; clones share the same objects
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<HashMap<String, Bytes>>>,
    /// Part count of each object written through `put_multipart`
    parts: Arc<RwLock<HashMap<String, usize>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Synchronous read for assertions
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.data.read().get(key).cloned()
    }

    /// Number of parts the object was uploaded in, `None` for single puts
    pub fn part_count(&self, key: &str) -> Option<usize> {
        self.parts.read().get(key).copied()
    }
}

/// Read up to `part_size` bytes from `file`; an empty part means end of file
pub(crate) async fn read_part(file: &mut File, part_size: usize) -> std::io::Result<Vec<u8>> {
    let mut part = Vec::with_capacity(part_size);
    file.take(part_size as u64).read_to_end(&mut part).await?;
    Ok(part)
}

impl ObjectStore for InMemoryObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: Bytes) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.data.write().insert(key.to_string(), data);
            self.parts.write().remove(key);
            Ok(())
        })
    }

    fn put_multipart<'a>(&'a self, key: &'a str, path: &'a Path, part_size: usize) -> StoreFuture<'a, u64> {
        debug_assert!(part_size > 0, "Precondition: part_size must be positive");

        Box::pin(async move {
            let mut file = File::open(path).await?;
            let mut object = Vec::new();
            let mut parts = 0;
            loop {
                let part = read_part(&mut file, part_size).await?;
                if part.is_empty() {
                    break;
                }
                parts += 1;
                object.extend_from_slice(&part);
            }

            let bytes = object.len() as u64;
            self.data.write().insert(key.to_string(), Bytes::from(object));
            self.parts.write().insert(key.to_string(), parts);
            Ok(bytes)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Bytes> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .cloned()
                .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
        })
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}
