//! In-memory storage backend — used by tests and the `memory` config option.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{breaker_open_err, CircuitBreaker, LatencyTracker, StorageBackend};
use crate::error::Result;

pub struct InMemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
    breaker: CircuitBreaker,
    latency: LatencyTracker,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            breaker: CircuitBreaker::new(10, Duration::from_secs(30)),
            latency: LatencyTracker::new(),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("in_memory"));
        }
        let start = std::time::Instant::now();
        let data = self.data.lock().expect("in-memory backend mutex poisoned");
        let result = data.get(key).cloned();
        self.breaker.record_success();
        self.record_latency("get", start.elapsed().as_secs_f64() * 1000.0);
        Ok(result)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("in_memory"));
        }
        let start = std::time::Instant::now();
        let mut data = self.data.lock().expect("in-memory backend mutex poisoned");
        data.insert(key.to_string(), value);
        self.breaker.record_success();
        self.record_latency("set", start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("in_memory"));
        }
        let start = std::time::Instant::now();
        let mut data = self.data.lock().expect("in-memory backend mutex poisoned");
        data.remove(key);
        self.breaker.record_success();
        self.record_latency("del", start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("in_memory"));
        }
        let start = std::time::Instant::now();
        let data = self.data.lock().expect("in-memory backend mutex poisoned");
        let result = data.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        self.breaker.record_success();
        self.record_latency("keys", start.elapsed().as_secs_f64() * 1000.0);
        Ok(result)
    }

    async fn atomic_incr(&self, key: &str, delta: i64) -> Result<i64> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("in_memory"));
        }
        let start = std::time::Instant::now();
        let mut data = self.data.lock().expect("in-memory backend mutex poisoned");
        let current = data
            .get(key)
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        data.insert(key.to_string(), next.to_string().into_bytes());
        self.breaker.record_success();
        self.record_latency("atomic_incr", start.elapsed().as_secs_f64() * 1000.0);
        Ok(next)
    }

    fn record_latency(&self, operation: &str, ms: f64) {
        self.latency.record(operation, ms);
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn latency_snapshot(&self) -> Vec<(String, u64, f64)> {
        self.latency.snapshot()
    }
}
