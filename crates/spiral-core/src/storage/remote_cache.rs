//! Distributed cache backend — a thin HTTP client over a remote key-value cache
//! service, for multi-process deployments (spec §4.A, "distributed cache (optional)").

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{breaker_open_err, CircuitBreaker, LatencyTracker, StorageBackend};
use crate::error::{Error, Result};

#[derive(Serialize)]
struct SetRequest<'a> {
    value: &'a [u8],
}

#[derive(Deserialize)]
struct GetResponse {
    value: Option<Vec<u8>>,
}

#[derive(Deserialize)]
struct IncrResponse {
    value: i64,
}

#[derive(Deserialize)]
struct KeysResponse {
    keys: Vec<String>,
}

pub struct RemoteCacheBackend {
    client: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
    latency: LatencyTracker,
}

impl RemoteCacheBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::BackendUnavailable(format!("reqwest client build: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            breaker: CircuitBreaker::new(5, Duration::from_secs(20)),
            latency: LatencyTracker::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn map_err(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::BackendTimeout(0)
        } else {
            Error::BackendUnavailable(format!("remote cache request failed: {e}"))
        }
    }
}

#[async_trait]
impl StorageBackend for RemoteCacheBackend {
    async fn init(&self) -> Result<()> {
        self.client
            .get(self.url("health"))
            .send()
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("remote_cache"));
        }
        let start = std::time::Instant::now();
        let resp = match self.client.get(self.url(&format!("kv/{key}"))).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.breaker.record_failure();
                self.record_latency("get", start.elapsed().as_secs_f64() * 1000.0);
                return Err(Self::map_err(e));
            }
        };
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            self.breaker.record_success();
            self.record_latency("get", start.elapsed().as_secs_f64() * 1000.0);
            return Ok(None);
        }
        let outcome = match resp.json::<GetResponse>().await {
            Ok(body) => {
                self.breaker.record_success();
                Ok(body.value)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Self::map_err(e))
            }
        };
        self.record_latency("get", start.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("remote_cache"));
        }
        let start = std::time::Instant::now();
        let body = SetRequest { value: &value };
        let outcome = match self
            .client
            .put(self.url(&format!("kv/{key}")))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                self.breaker.record_success();
                Ok(())
            }
            Ok(resp) => {
                self.breaker.record_failure();
                Err(Error::BackendUnavailable(format!(
                    "remote cache set returned {}",
                    resp.status()
                )))
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Self::map_err(e))
            }
        };
        self.record_latency("set", start.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn del(&self, key: &str) -> Result<()> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("remote_cache"));
        }
        let start = std::time::Instant::now();
        let outcome = match self.client.delete(self.url(&format!("kv/{key}"))).send().await {
            Ok(resp) if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND => {
                self.breaker.record_success();
                Ok(())
            }
            Ok(resp) => {
                self.breaker.record_failure();
                Err(Error::BackendUnavailable(format!(
                    "remote cache del returned {}",
                    resp.status()
                )))
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Self::map_err(e))
            }
        };
        self.record_latency("del", start.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("remote_cache"));
        }
        let start = std::time::Instant::now();
        let outcome = match self
            .client
            .get(self.url(&format!("kv-keys?prefix={prefix}")))
            .send()
            .await
        {
            Ok(resp) => match resp.json::<KeysResponse>().await {
                Ok(body) => {
                    self.breaker.record_success();
                    Ok(body.keys)
                }
                Err(e) => {
                    self.breaker.record_failure();
                    Err(Self::map_err(e))
                }
            },
            Err(e) => {
                self.breaker.record_failure();
                Err(Self::map_err(e))
            }
        };
        self.record_latency("keys", start.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn atomic_incr(&self, key: &str, delta: i64) -> Result<i64> {
        if !self.breaker.is_call_permitted() {
            return Err(breaker_open_err("remote_cache"));
        }
        let start = std::time::Instant::now();
        let outcome = match self
            .client
            .post(self.url(&format!("kv/{key}/incr")))
            .json(&serde_json::json!({ "delta": delta }))
            .send()
            .await
        {
            Ok(resp) => match resp.json::<IncrResponse>().await {
                Ok(body) => {
                    self.breaker.record_success();
                    Ok(body.value)
                }
                Err(e) => {
                    self.breaker.record_failure();
                    Err(Self::map_err(e))
                }
            },
            Err(e) => {
                self.breaker.record_failure();
                Err(Self::map_err(e))
            }
        };
        self.record_latency("atomic_incr", start.elapsed().as_secs_f64() * 1000.0);
        outcome
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
