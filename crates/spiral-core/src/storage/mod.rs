//! Storage Backend Contract (spec §4.A) — a pluggable key-value adapter with atomic
//! counters, circuit breakers, and latency instrumentation.

mod breaker;
mod memory;

#[cfg(feature = "local_kv")]
mod local_kv;

#[cfg(feature = "remote_cache")]
mod remote_cache;

pub use breaker::{CircuitBreaker, CircuitState};
pub use memory::InMemoryBackend;

#[cfg(feature = "local_kv")]
pub use local_kv::LocalKvBackend;

#[cfg(feature = "remote_cache")]
pub use remote_cache::RemoteCacheBackend;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Per-operation latency accumulator backing the `storage_latency_ms{method,backend}`
/// histogram (spec §4.H). A plain count+sum summary, not bucketed.
#[derive(Default)]
pub struct LatencyTracker {
    inner: Mutex<HashMap<String, (u64, f64)>>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, operation: &str, ms: f64) {
        let mut inner = self.inner.lock().expect("latency tracker mutex poisoned");
        let entry = inner.entry(operation.to_string()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += ms;
    }

    /// `(operation, sample_count, sum_ms)` for every operation observed so far.
    pub fn snapshot(&self) -> Vec<(String, u64, f64)> {
        let inner = self.inner.lock().expect("latency tracker mutex poisoned");
        inner.iter().map(|(op, (count, sum))| (op.clone(), *count, *sum)).collect()
    }
}

/// Fixed key prefixes (spec §6, durable & bit-exact).
pub fn mem_key(id: &str) -> String {
    format!("mem:{id}")
}
pub fn spiral_key(id: &str) -> String {
    format!("spiral:{id}")
}
pub fn sigil_key(signature: &str) -> String {
    format!("sigil:{signature}")
}
pub fn spiral_count_key(id: &str) -> String {
    format!("spiral_count:{id}")
}

/// A pluggable key-value persistence backend (spec §4.A).
///
/// Every method is wrapped by the backend's own [`CircuitBreaker`]; when the breaker is
/// open, calls fail fast with [`Error::BackendUnavailable`] without attempting I/O.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Establish a connection and perform a health check.
    async fn init(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;

    /// All keys with the given prefix. Used only at startup reload (spec §4.A).
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Atomically add `delta` to the integer stored at `key`, returning the new value.
    /// If the backend lacks native atomicity, this is synthesized via a lock.
    async fn atomic_incr(&self, key: &str, delta: i64) -> Result<i64>;

    /// Instrumentation hook: record the latency (ms) of `operation`.
    fn record_latency(&self, operation: &str, ms: f64);

    /// The backend's circuit breaker, for observability.
    fn breaker(&self) -> &CircuitBreaker;

    /// Accumulated per-operation latency samples, for the `storage_latency_ms` metric.
    /// Backends with no tracker report an empty snapshot.
    fn latency_snapshot(&self) -> Vec<(String, u64, f64)> {
        Vec::new()
    }
}

/// Error string dev/backends use for an operation that should fail because the circuit
/// is open. A small helper shared across backend implementations.
pub(crate) fn breaker_open_err(name: &str) -> Error {
    Error::BackendUnavailable(format!("{name} circuit breaker is open"))
}
