//! Embedded key-value file store backend, built on `redb`. This is the default,
//! single-process backend (spec §4.A).

use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use super::{breaker_open_err, CircuitBreaker, LatencyTracker, StorageBackend};
use crate::error::{Error, Result};

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("spiral_entries");

pub struct LocalKvBackend {
    db: StdMutex<Database>,
    breaker: CircuitBreaker,
    latency: LatencyTracker,
}

impl LocalKvBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)
            .map_err(|e| Error::BackendUnavailable(format!("redb open failed: {e}")))?;
        {
            let write = db
                .begin_write()
                .map_err(|e| Error::BackendUnavailable(format!("redb begin_write: {e}")))?;
            {
                write
                    .open_table(ENTRIES)
                    .map_err(|e| Error::BackendUnavailable(format!("redb open_table: {e}")))?;
            }
            write
                .commit()
                .map_err(|e| Error::BackendUnavailable(format!("redb commit: {e}")))?;
        }
        Ok(Self {
            db: StdMutex::new(db),
            breaker: CircuitBreaker::new(5, Duration::from_secs(15)),
            latency: LatencyTracker::new(),
        })
    }
}

#[async_trait]
impl StorageBackend for LocalKvBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("local_kv"));
        }
        let start = std::time::Instant::now();
        let db = self.db.lock().expect("redb mutex poisoned");
        let result = (|| -> std::result::Result<Option<Vec<u8>>, redb::Error> {
            let read = db.begin_read()?;
            let table = read.open_table(ENTRIES)?;
            Ok(table.get(key)?.map(|v| v.value().to_vec()))
        })();
        self.record_latency("get", start.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(v) => {
                self.breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Error::BackendUnavailable(format!("redb get: {e}")))
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("local_kv"));
        }
        let start = std::time::Instant::now();
        let db = self.db.lock().expect("redb mutex poisoned");
        let result = (|| -> std::result::Result<(), redb::Error> {
            let write = db.begin_write()?;
            {
                let mut table = write.open_table(ENTRIES)?;
                table.insert(key, value.as_slice())?;
            }
            write.commit()?;
            Ok(())
        })();
        self.record_latency("set", start.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Error::BackendUnavailable(format!("redb set: {e}")))
            }
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("local_kv"));
        }
        let start = std::time::Instant::now();
        let db = self.db.lock().expect("redb mutex poisoned");
        let result = (|| -> std::result::Result<(), redb::Error> {
            let write = db.begin_write()?;
            {
                let mut table = write.open_table(ENTRIES)?;
                table.remove(key)?;
            }
            write.commit()?;
            Ok(())
        })();
        self.record_latency("del", start.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Error::BackendUnavailable(format!("redb del: {e}")))
            }
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("local_kv"));
        }
        let start = std::time::Instant::now();
        let db = self.db.lock().expect("redb mutex poisoned");
        let result = (|| -> std::result::Result<Vec<String>, redb::Error> {
            let read = db.begin_read()?;
            let table = read.open_table(ENTRIES)?;
            let mut out = Vec::new();
            for entry in table.iter()? {
                let (k, _) = entry?;
                if k.value().starts_with(prefix) {
                    out.push(k.value().to_string());
                }
            }
            Ok(out)
        })();
        self.record_latency("keys", start.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(v) => {
                self.breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Error::BackendUnavailable(format!("redb keys: {e}")))
            }
        }
    }

    async fn atomic_incr(&self, key: &str, delta: i64) -> Result<i64> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("local_kv"));
        }
        let start = std::time::Instant::now();
        let db = self.db.lock().expect("redb mutex poisoned");
        let result = (|| -> std::result::Result<i64, redb::Error> {
            let write = db.begin_write()?;
            let next;
            {
                let mut table = write.open_table(ENTRIES)?;
                let current = table
                    .get(key)?
                    .and_then(|v| std::str::from_utf8(v.value()).ok().map(str::to_owned))
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0);
                next = current + delta;
                table.insert(key, next.to_string().into_bytes().as_slice())?;
            }
            write.commit()?;
            Ok(next)
        })();
        self.record_latency("atomic_incr", start.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(v) => {
                self.breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Error::BackendUnavailable(format!("redb atomic_incr: {e}")))
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");
        let backend = LocalKvBackend::open(&path).unwrap();
        backend.set("mem:1", b"hello".to_vec()).await.unwrap();
        assert_eq!(backend.get("mem:1").await.unwrap(), Some(b"hello".to_vec()));
        drop(backend);

        let reopened = LocalKvBackend::open(&path).unwrap();
        assert_eq!(reopened.get("mem:1").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn atomic_incr_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalKvBackend::open(dir.path().join("store.redb")).unwrap();
        assert_eq!(backend.atomic_incr("spiral_count:a", 1).await.unwrap(), 1);
        assert_eq!(backend.atomic_incr("spiral_count:a", 2).await.unwrap(), 3);
    }
}
