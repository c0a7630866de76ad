//! Configuration (spec §6). All tunable parameters in one place, loaded from TOML at
//! startup, falling back to defaults if no config file exists.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Deployment mode. In `Production`, a missing `event_signing_key` is a fatal startup
/// error (spec §6, §7) rather than a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Development,
    Production,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Development
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Memory,
    LocalKv,
    RemoteCache,
    RemoteCluster,
}

impl Default for StorageBackendKind {
    fn default() -> Self {
        StorageBackendKind::LocalKv
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: RunMode,

    pub storage_backend: StorageBackendKind,
    pub storage_path: String,
    pub remote_cache_url: Option<String>,
    pub remote_cluster_url: Option<String>,
    pub remote_cache_tls: bool,

    /// HMAC key for event-bus signature verification. Read from `event_signing_key`
    /// or the `SPIRAL_EVENT_SIGNING_KEY` environment variable; **required** in
    /// production mode.
    pub event_signing_key: Option<String>,

    pub sigil_hash_slice: usize,
    pub sigil_geometry_sides: u32,

    pub gc_budget_scale: u64,
    pub gc_forced_skip_limit: u32,
    pub gc_age_threshold_ms: u64,
    pub gc_access_threshold: u64,
    pub gc_min_strength: f64,

    pub max_spirals: usize,
    pub max_nodes_per_spiral: u32,
    pub sigil_cache_capacity: usize,
    pub event_history_capacity: usize,

    pub hd_weight_distance: f64,
    pub hd_weight_load: f64,
    pub hd_weight_age: f64,

    pub metrics_port: u16,
    pub metrics_jwt_secret: Option<String>,

    /// Interval between internally-emitted `system_tick` events, driving the GC
    /// scheduler, deferred-association flush, and stats rebuild (spec §4.E/§4.F).
    pub system_tick_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: RunMode::Development,
            storage_backend: StorageBackendKind::LocalKv,
            storage_path: "./data/spiral".to_string(),
            remote_cache_url: None,
            remote_cluster_url: None,
            remote_cache_tls: false,
            event_signing_key: None,
            sigil_hash_slice: 10,
            sigil_geometry_sides: 13,
            gc_budget_scale: 10,
            gc_forced_skip_limit: 3,
            gc_age_threshold_ms: 24 * 60 * 60 * 1000,
            gc_access_threshold: 2,
            gc_min_strength: 0.5,
            max_spirals: 64,
            max_nodes_per_spiral: 1000,
            sigil_cache_capacity: 5000,
            event_history_capacity: 100,
            hd_weight_distance: 0.5,
            hd_weight_load: 0.3,
            hd_weight_age: 0.2,
            metrics_port: 9090,
            metrics_jwt_secret: None,
            system_tick_interval_ms: 1000,
        }
    }
}

/// Reasons startup must be refused (spec §6 exit codes).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("event_signing_key is required in production mode")]
    MissingSigningKeyInProduction,
}

impl Config {
    /// Load config from a TOML file, falling back to defaults if absent or unparsable.
    pub fn load(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded config");
                    config
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("SPIRAL_EVENT_SIGNING_KEY") {
            self.event_signing_key = Some(key);
        }
        if let Ok(mode) = std::env::var("SPIRAL_MODE") {
            if mode.eq_ignore_ascii_case("production") {
                self.mode = RunMode::Production;
            }
        }
    }

    /// Validate production-mode invariants (spec §6, exit code 1 on failure).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == RunMode::Production && self.event_signing_key.is_none() {
            return Err(ConfigError::MissingSigningKeyInProduction);
        }
        Ok(())
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.sigil_hash_slice, 10);
        assert_eq!(config.gc_forced_skip_limit, 3);
        assert_eq!(config.gc_age_threshold_ms, 86_400_000);
    }

    #[test]
    fn production_without_signing_key_is_rejected() {
        let mut config = Config::default();
        config.mode = RunMode::Production;
        assert!(matches!(config.validate(), Err(ConfigError::MissingSigningKeyInProduction)));
    }

    #[test]
    fn production_with_signing_key_is_accepted() {
        let mut config = Config::default();
        config.mode = RunMode::Production;
        config.event_signing_key = Some("key".to_string());
        assert!(config.validate().is_ok());
    }
}
