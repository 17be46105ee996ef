//! Simulated Object Store with Fault Injection
//!
//! Wraps another store and injects failures and latency into puts, while
//! recording how many puts were in flight at once. Used to exercise retry
//! and bounded-concurrency behaviour without a network.

use crate::upload::object_store::{ObjectStore, ObjectStoreError, StoreFuture};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Number of initial puts that fail before the store starts succeeding
    pub fail_first_puts: u64,
    /// Error returned by injected failures
    pub failure: ObjectStoreError,
    /// Simulated put latency range in milliseconds (min, max)
    pub latency_range_ms: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        Self::no_faults()
    }
}

impl SimulatedStoreConfig {
    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            fail_first_puts: 0,
            failure: ObjectStoreError::Transient("simulated put failure".to_string()),
            latency_range_ms: (0, 0),
        }
    }

    /// Fail the first `n` puts with a transient error
    pub fn flaky(n: u64) -> Self {
        SimulatedStoreConfig {
            fail_first_puts: n,
            ..Self::no_faults()
        }
    }

    /// Fail every put with a non-retryable error
    pub fn denied() -> Self {
        SimulatedStoreConfig {
            fail_first_puts: u64::MAX,
            failure: ObjectStoreError::PermissionDenied("simulated access denied".to_string()),
            latency_range_ms: (0, 0),
        }
    }

    pub fn with_latency_ms(mut self, min: u64, max: u64) -> Self {
        self.latency_range_ms = (min, max);
        self
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    /// Single and multipart puts alike
    pub put_attempts: u64,
    pub put_failures: u64,
    pub put_successes: u64,
    /// Puts currently between entry and completion
    pub in_flight: u64,
    /// Highest `in_flight` observed
    pub max_in_flight: u64,
}

/// Simulated object store that wraps another store and injects faults
#[derive(Debug, Clone)]
pub struct SimulatedObjectStore<S: ObjectStore + Clone> {
    inner_store: S,
    config: SimulatedStoreConfig,
    stats: Arc<Mutex<SimulatedStoreStats>>,
}

impl<S: ObjectStore + Clone> SimulatedObjectStore<S> {
    pub fn new(inner_store: S, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            config,
            stats: Arc::new(Mutex::new(SimulatedStoreStats::default())),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.stats.lock().clone()
    }

    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    fn latency(&self) -> Option<Duration> {
        let (min, max) = self.config.latency_range_ms;
        let ms = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    /// Count the attempt, then fail it or run `operation` after the latency
    async fn simulate<T>(&self, operation: StoreFuture<'_, T>) -> Result<T, ObjectStoreError> {
        let latency = self.latency();
        let inject_failure = {
            let mut stats = self.stats.lock();
            stats.put_attempts += 1;
            stats.in_flight += 1;
            stats.max_in_flight = stats.max_in_flight.max(stats.in_flight);
            stats.put_attempts <= self.config.fail_first_puts
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = if inject_failure {
            Err(self.config.failure.clone())
        } else {
            operation.await
        };

        let mut stats = self.stats.lock();
        stats.in_flight -= 1;
        match result {
            Ok(_) => stats.put_successes += 1,
            Err(_) => stats.put_failures += 1,
        }
        result
    }
}

impl<S: ObjectStore + Clone> ObjectStore for SimulatedObjectStore<S> {
    fn put<'a>(&'a self, key: &'a str, data: Bytes) -> StoreFuture<'a, ()> {
        Box::pin(self.simulate(self.inner_store.put(key, data)))
    }

    fn put_multipart<'a>(&'a self, key: &'a str, path: &'a Path, part_size: usize) -> StoreFuture<'a, u64> {
        Box::pin(self.simulate(self.inner_store.put_multipart(key, path, part_size)))
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Bytes> {
        self.inner_store.get(key)
    }

    fn location(&self) -> String {
        self.inner_store.location()
    }
}
