//! Upload Stress Tests
//!
//! Push many files through the uploader against a simulated store with
//! injected latency and failures, then check the run-level properties:
//!
//! 1. **Bounded**: never more puts in flight than `concurrency_max`
//! 2. **Complete**: every non-empty file lands under its key exactly once
//! 3. **Clean**: uploaded files are removed, failed ones stay on disk

use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use target_s3_jsonl::upload::{
    InMemoryObjectStore, ObjectStoreError, RetryPolicy, SimulatedObjectStore,
    SimulatedStoreConfig, UploadError, UploadTask, Uploader, UploaderOptions,
};
use tempfile::tempdir;

// =============================================================================
// Helpers
// =============================================================================

fn write_tasks(dir: &Path, count: usize) -> Vec<UploadTask> {
    (0..count)
        .map(|i| {
            let stream = format!("stream_{:03}", i);
            let local_path = dir.join(format!("{}.json", stream));
            std::fs::write(&local_path, format!("{{\"id\":{}}}\n", i)).unwrap();
            UploadTask {
                remote_key: format!("{}/{}.json", stream, stream),
                stream,
                local_path,
            }
        })
        .collect()
}

fn options(concurrency_max: usize) -> UploaderOptions {
    UploaderOptions {
        concurrency_max,
        retry: RetryPolicy::test(),
        ..UploaderOptions::default()
    }
}

// =============================================================================
// Concurrency bound
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_bound_holds_across_limits() {
    for limit in [1usize, 2, 5, 16] {
        let dir = tempdir().unwrap();
        let tasks = write_tasks(dir.path(), 40);
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedStoreConfig::no_faults().with_latency_ms(1, 5),
        );
        let uploader = Uploader::new(Arc::new(store.clone()), options(limit));

        let summary = uploader.upload_all(tasks.clone()).await.unwrap();

        let stats = store.stats();
        assert!(
            stats.max_in_flight <= limit as u64,
            "limit {} exceeded: {} in flight",
            limit,
            stats.max_in_flight
        );
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.put_successes, 40);
        assert_eq!(summary.uploaded.len(), 40);
        assert_eq!(store.inner().len(), 40);
        assert!(tasks.iter().all(|t| !t.local_path.exists()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_limit_allows_overlap() {
    let dir = tempdir().unwrap();
    let tasks = write_tasks(dir.path(), 20);
    let store = SimulatedObjectStore::new(
        InMemoryObjectStore::new(),
        SimulatedStoreConfig::no_faults().with_latency_ms(30, 30),
    );
    let uploader = Uploader::new(Arc::new(store.clone()), options(1000));

    uploader.upload_all(tasks).await.unwrap();

    assert!(store.stats().max_in_flight > 1);
}

// =============================================================================
// Contents
// =============================================================================

#[tokio::test]
async fn test_every_object_matches_its_file() {
    let dir = tempdir().unwrap();
    let tasks = write_tasks(dir.path(), 25);
    let store = InMemoryObjectStore::new();
    let uploader = Uploader::new(Arc::new(store.clone()), options(4));

    let summary = uploader.upload_all(tasks.clone()).await.unwrap();

    let mut expected: Vec<String> = tasks.iter().map(|t| t.remote_key.clone()).collect();
    expected.sort();
    assert_eq!(summary.uploaded, expected);
    assert_eq!(store.keys(), expected);

    for (i, task) in tasks.iter().enumerate() {
        let body = store.object(&task.remote_key).unwrap();
        assert_eq!(body, Bytes::from(format!("{{\"id\":{}}}\n", i)));
    }
    assert_eq!(summary.bytes, tasks.len() as u64 * 9 + 15);
}

#[tokio::test]
async fn test_missing_and_empty_files_are_skipped() {
    let dir = tempdir().unwrap();
    let mut tasks = write_tasks(dir.path(), 3);
    std::fs::write(&tasks[1].local_path, b"").unwrap();
    std::fs::remove_file(&tasks[2].local_path).unwrap();
    tasks.push(UploadTask {
        stream: "ghost".to_string(),
        local_path: dir.path().join("ghost.json"),
        remote_key: "ghost/ghost.json".to_string(),
    });

    let store = InMemoryObjectStore::new();
    let uploader = Uploader::new(Arc::new(store.clone()), options(2));
    let summary = uploader.upload_all(tasks).await.unwrap();

    assert_eq!(summary.uploaded, vec!["stream_000/stream_000.json".to_string()]);
    assert_eq!(summary.skipped, 3);
    assert_eq!(store.len(), 1);
}

// =============================================================================
// Faults
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_faults_are_absorbed_by_retry() {
    let dir = tempdir().unwrap();
    let tasks = write_tasks(dir.path(), 10);
    // Fewer injected failures than tasks, so no single task can exhaust retries
    let store = SimulatedObjectStore::new(
        InMemoryObjectStore::new(),
        SimulatedStoreConfig::flaky(4).with_latency_ms(0, 3),
    );
    let uploader = Uploader::new(Arc::new(store.clone()), options(3));

    let summary = uploader.upload_all(tasks).await.unwrap();

    let stats = store.stats();
    assert_eq!(summary.uploaded.len(), 10);
    assert_eq!(stats.put_failures, 4);
    assert_eq!(stats.put_successes, 10);
    assert_eq!(stats.put_attempts, 14);
}

#[tokio::test]
async fn test_permanent_fault_fails_batch_and_keeps_files() {
    let dir = tempdir().unwrap();
    let tasks = write_tasks(dir.path(), 5);
    let store = SimulatedObjectStore::new(InMemoryObjectStore::new(), SimulatedStoreConfig::denied());
    let uploader = Uploader::new(Arc::new(store.clone()), options(1));

    let err = uploader.upload_all(tasks.clone()).await.unwrap_err();

    match err {
        UploadError::Store { source, .. } => {
            assert!(matches!(source, ObjectStoreError::PermissionDenied(_)))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(tasks.iter().all(|t| t.local_path.exists()));
    assert!(store.inner().is_empty());
}
