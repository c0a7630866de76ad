//! # Spiral Core
//!
//! A persistent associative memory store whose records are organized along parametric
//! spirals, indexed by content-derived sigils, and managed by a time-budgeted,
//! priority-driven garbage collector.
//!
//! The crate treats [`types::SpiralType`] and [`types::MemoryDepth`] as opaque tags
//! drawn from closed enumerations — it never ascribes meaning to them, only the
//! numeric parameters attached in [`types`].
//!
//! ## Layout
//!
//! - [`storage`] — pluggable key-value backend contract, with in-memory, embedded
//!   (`redb`), and remote-cache implementations, each behind a circuit breaker.
//! - [`sigil`] — pure content → sigil encoding.
//! - [`spiral`] — spiral selection and parametric node placement.
//! - [`store`] — the `MemoryStore`, exclusive owner of the in-memory caches.
//! - [`gc`] — the tick-driven GC scheduler.
//! - [`stats`] — the stats rebuilder.
//! - [`bus`] — the typed, in-process event bus tying the above together.

pub mod bus;
pub mod config;
pub mod error;
pub mod gc;
pub mod heap;
pub mod lfu;
pub mod node;
pub mod sigil;
pub mod spiral;
pub mod stats;
pub mod storage;
pub mod store;
pub mod types;

pub mod prelude {
    pub use crate::bus::{Event, EventBus, Topic};
    pub use crate::config::{Config, RunMode, StorageBackendKind};
    pub use crate::error::{Error, Result};
    pub use crate::gc::{run_gc_tick, GcTickReport};
    pub use crate::node::{MemoryNode, Position};
    pub use crate::sigil::{Sigil, SigilConfig};
    pub use crate::spiral::{SelectionWeights, Spiral};
    pub use crate::stats::{rebuild_stats, RebuildReport};
    pub use crate::storage::{CircuitBreaker, CircuitState, InMemoryBackend, StorageBackend};
    pub use crate::store::{GcPolicy, MemoryStore};
    pub use crate::types::{MemoryDepth, MemoryType, SpiralType};
    pub use crate::{build_backend, init_store, StartupError, SCHEMA_VERSION};
}

use std::sync::Arc;

use config::Config;
use error::{Error, Result};
use storage::StorageBackend;
use store::{GcPolicy, MemoryStore};

/// On-disk schema version for the `mem:`/`spiral:`/`sigil:` key layout (spec §6).
/// Bump this only when the durable record format changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &str = "schema:version";

/// Everything that can fail before a store is usable, distinguished so the caller
/// (the server binary) can map each to the exit code spec §6 assigns it.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("schema version mismatch: on-disk {found}, expected {expected}")]
    SchemaMismatch { expected: u32, found: u32 },
    #[error(transparent)]
    Backend(#[from] Error),
}

/// Construct the storage backend named by `config.storage_backend` (spec §6).
pub fn build_backend(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    use config::StorageBackendKind;
    match config.storage_backend {
        StorageBackendKind::Memory => Ok(Arc::new(storage::InMemoryBackend::new())),
        StorageBackendKind::LocalKv => {
            #[cfg(feature = "local_kv")]
            {
                let path = std::path::Path::new(&config.storage_path).join("spiral.redb");
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::BackendUnavailable(format!("create storage_path: {e}")))?;
                }
                Ok(Arc::new(storage::LocalKvBackend::open(path)?))
            }
            #[cfg(not(feature = "local_kv"))]
            {
                Err(Error::BackendUnavailable("local_kv feature not enabled".to_string()))
            }
        }
        StorageBackendKind::RemoteCache | StorageBackendKind::RemoteCluster => {
            #[cfg(feature = "remote_cache")]
            {
                let url = config
                    .remote_cache_url
                    .clone()
                    .or_else(|| config.remote_cluster_url.clone())
                    .ok_or_else(|| Error::InvalidInput("remote_cache_url or remote_cluster_url required".to_string()))?;
                Ok(Arc::new(storage::RemoteCacheBackend::new(url, std::time::Duration::from_secs(5))?))
            }
            #[cfg(not(feature = "remote_cache"))]
            {
                Err(Error::BackendUnavailable("remote_cache feature not enabled".to_string()))
            }
        }
    }
}

/// Read `schema:version`, writing [`SCHEMA_VERSION`] on first run and refusing to
/// start on a mismatch (spec §6 exit code 3).
async fn check_schema_version(backend: &dyn StorageBackend) -> std::result::Result<(), StartupError> {
    match backend.get(SCHEMA_VERSION_KEY).await? {
        Some(bytes) => {
            let found: u32 = std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::InvariantViolation("schema:version is not a valid integer".to_string()))?;
            if found != SCHEMA_VERSION {
                return Err(StartupError::SchemaMismatch { expected: SCHEMA_VERSION, found });
            }
            Ok(())
        }
        None => {
            backend.set(SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string().into_bytes()).await?;
            Ok(())
        }
    }
}

/// Build a [`MemoryStore`] from `config`, wired to the given `bus`, and reload any
/// persisted state from the backend (spec §4.D step 8 crash-recovery contract). The
/// returned store already has its request-topic handlers subscribed (spec §4.G).
pub async fn init_store(config: &Config, bus: Arc<bus::EventBus>) -> std::result::Result<Arc<MemoryStore>, StartupError> {
    config.validate()?;

    let backend = build_backend(config)?;
    backend.init().await?;
    check_schema_version(backend.as_ref()).await?;

    let sigil_config = sigil::SigilConfig {
        hash_slice: config.sigil_hash_slice,
        geometry_sides: config.sigil_geometry_sides,
        ..sigil::SigilConfig::default()
    };
    let weights = spiral::SelectionWeights {
        distance: config.hd_weight_distance,
        load: config.hd_weight_load,
        age: config.hd_weight_age,
        ..spiral::SelectionWeights::default()
    };
    let gc_policy = GcPolicy {
        age_threshold_ms: config.gc_age_threshold_ms,
        access_threshold: config.gc_access_threshold,
        min_strength: config.gc_min_strength,
        forced_skip_limit: config.gc_forced_skip_limit,
        budget_scale: config.gc_budget_scale,
        ..GcPolicy::default()
    };

    let store = Arc::new(
        MemoryStore::new(backend.clone(), bus, sigil_config, weights, config.max_spirals, gc_policy)
            .with_sigil_cache_capacity(config.sigil_cache_capacity),
    );

    reload_from_backend(&store, backend.as_ref()).await?;
    store.wire_bus_handlers();
    Ok(store)
}

/// Reload spirals and nodes from the backend's `spiral:*` and `mem:*` prefixes
/// (spec §4.D step 8, §6 durability contract).
async fn reload_from_backend(store: &MemoryStore, backend: &dyn StorageBackend) -> Result<()> {
    for key in backend.keys("spiral:").await? {
        if let Some(bytes) = backend.get(&key).await? {
            if let Ok(spiral) = serde_json::from_slice::<spiral::Spiral>(&bytes) {
                store.insert_spiral_for_reload(spiral).await;
            }
        }
    }
    for key in backend.keys("mem:").await? {
        if let Some(bytes) = backend.get(&key).await? {
            if let Ok(node) = serde_json::from_slice::<node::MemoryNode>(&bytes) {
                store.insert_node_for_reload(node).await;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::EventBus;

    #[tokio::test]
    async fn init_store_writes_schema_version_on_first_run() {
        let backend: Arc<dyn StorageBackend> = Arc::new(storage::InMemoryBackend::new());
        backend.init().await.unwrap();
        check_schema_version(backend.as_ref()).await.unwrap();
        let stored = backend.get(SCHEMA_VERSION_KEY).await.unwrap().unwrap();
        assert_eq!(stored, SCHEMA_VERSION.to_string().into_bytes());
    }

    #[tokio::test]
    async fn init_store_rejects_mismatched_schema_version() {
        let backend: Arc<dyn StorageBackend> = Arc::new(storage::InMemoryBackend::new());
        backend.init().await.unwrap();
        backend.set(SCHEMA_VERSION_KEY, b"999".to_vec()).await.unwrap();
        let err = check_schema_version(backend.as_ref()).await.unwrap_err();
        assert!(matches!(err, StartupError::SchemaMismatch { expected: SCHEMA_VERSION, found: 999 }));
    }

    #[tokio::test]
    async fn init_store_rejects_missing_signing_key_in_production() {
        let mut config = Config::default();
        config.mode = config::RunMode::Production;
        config.storage_backend = config::StorageBackendKind::Memory;
        let bus = Arc::new(EventBus::new(10, None));
        let result = init_store(&config, bus).await;
        assert!(matches!(result, Err(StartupError::Config(config::ConfigError::MissingSigningKeyInProduction))));
    }
}
