//! Object Storage Upload
//!
//! Moves finished stream files into the bucket.
//!
//! ## Architecture
//!
//! ```text
//! UploadTask → Uploader ─(Semaphore, retry)→ ObjectStore::{put, put_multipart}
//!                                             ├─ S3ObjectStore
//!                                             ├─ InMemoryObjectStore
//!                                             └─ SimulatedObjectStore
//! ```

pub mod encryption;
pub mod object_store;
pub mod retry;
pub mod s3_store;
pub mod simulated_store;
pub mod uploader;

pub use encryption::Encryption;
pub use object_store::{InMemoryObjectStore, ObjectStore, ObjectStoreError, StoreFuture};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use s3_store::S3ObjectStore;
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
pub use uploader::{
    part_size_for, UploadError, UploadOutcome, UploadSummary, UploadTask, Uploader, UploaderOptions,
    DEFAULT_CONCURRENCY_MAX, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, MULTIPART_PARTS_MAX,
};
