//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (RELCTX_*)
//! 2. TOML config file (if RELCTX_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::affinity::AffinityParams;
use crate::cache::CompressionType;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (RELCTX_*)
/// 2. TOML config file (if RELCTX_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite database holding cache entries, access log, patterns and shares.
    ///
    /// Set via RELCTX_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Compression applied to stored payloads.
    #[serde(default)]
    pub compression: CompressionType,

    /// Default cache entry lifetime in seconds. 0 keeps entries until invalidated.
    ///
    /// Set via RELCTX_CACHE_TTL_SECS environment variable.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// How long access events are kept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum rows deleted per statement during retention pruning and share sweeps.
    #[serde(default = "default_prune_batch_size")]
    pub prune_batch_size: usize,

    /// Two accesses by one user at most this far apart count as co-access.
    #[serde(default = "default_adjacency_window_secs")]
    pub adjacency_window_secs: u64,

    /// Minimum co-access count before a pattern affects affinity scores.
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: u64,

    /// Co-access count at which the raw score saturates at 1.0.
    #[serde(default = "default_saturation_count")]
    pub saturation_count: u64,

    /// Weight kept by the previous affinity score on each update, in (0, 1).
    ///
    /// Set via RELCTX_DECAY_FACTOR environment variable.
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    /// Share token lifetime used when a caller gives none.
    #[serde(default = "default_share_ttl_secs")]
    pub share_ttl_secs: u64,

    /// Upper bound for caller-supplied share lifetimes.
    #[serde(default = "default_max_share_ttl_secs")]
    pub max_share_ttl_secs: u64,

    /// A delta is served only when it is at most this fraction of the full payload.
    #[serde(default = "default_delta_max_ratio")]
    pub delta_max_ratio: f64,

    /// Default number of related types returned.
    #[serde(default = "default_related_limit")]
    pub related_limit: usize,

    /// Whether the server runs the periodic jobs.
    ///
    /// Set via RELCTX_SCHEDULER_ENABLED environment variable.
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,

    #[serde(default = "default_daily_secs")]
    pub prune_interval_secs: u64,

    #[serde(default = "default_hourly_secs")]
    pub aggregate_interval_secs: u64,

    #[serde(default = "default_weekly_secs")]
    pub affinity_interval_secs: u64,

    #[serde(default = "default_daily_secs")]
    pub share_sweep_interval_secs: u64,

    #[serde(default = "default_hourly_secs")]
    pub cache_sweep_interval_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./relctx.sqlite")
}

fn default_cache_ttl_secs() -> u64 {
    86_400
}

fn default_retention_days() -> u32 {
    30
}

fn default_prune_batch_size() -> usize {
    1000
}

fn default_adjacency_window_secs() -> u64 {
    900 // 15 minutes
}

fn default_significance_threshold() -> u64 {
    3
}

fn default_saturation_count() -> u64 {
    50
}

fn default_decay_factor() -> f64 {
    0.8
}

fn default_share_ttl_secs() -> u64 {
    3600
}

fn default_max_share_ttl_secs() -> u64 {
    7 * 86_400
}

fn default_delta_max_ratio() -> f64 {
    0.5
}

fn default_related_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_hourly_secs() -> u64 {
    3600
}

fn default_daily_secs() -> u64 {
    86_400
}

fn default_weekly_secs() -> u64 {
    7 * 86_400
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            compression: CompressionType::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
            retention_days: default_retention_days(),
            prune_batch_size: default_prune_batch_size(),
            adjacency_window_secs: default_adjacency_window_secs(),
            significance_threshold: default_significance_threshold(),
            saturation_count: default_saturation_count(),
            decay_factor: default_decay_factor(),
            share_ttl_secs: default_share_ttl_secs(),
            max_share_ttl_secs: default_max_share_ttl_secs(),
            delta_max_ratio: default_delta_max_ratio(),
            related_limit: default_related_limit(),
            scheduler_enabled: true,
            prune_interval_secs: default_daily_secs(),
            aggregate_interval_secs: default_hourly_secs(),
            affinity_interval_secs: default_weekly_secs(),
            share_sweep_interval_secs: default_daily_secs(),
            cache_sweep_interval_secs: default_hourly_secs(),
        }
    }
}

impl AppConfig {
    /// Default cache TTL; `None` when entries live until invalidated.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn adjacency_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.adjacency_window_secs as i64)
    }

    pub fn affinity_params(&self) -> AffinityParams {
        AffinityParams {
            significance_threshold: self.significance_threshold,
            saturation_count: self.saturation_count,
            decay: self.decay_factor,
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `RELCTX_`
    /// 2. TOML file from `RELCTX_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed,
    /// or if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("RELCTX_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("RELCTX_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./relctx.sqlite"));
        assert_eq!(config.compression, CompressionType::Zstd);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.prune_batch_size, 1000);
        assert_eq!(config.adjacency_window_secs, 900);
        assert_eq!(config.significance_threshold, 3);
        assert_eq!(config.saturation_count, 50);
        assert!((config.decay_factor - 0.8).abs() < f64::EPSILON);
        assert!(config.scheduler_enabled);
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let config = AppConfig { cache_ttl_secs: 0, ..Default::default() };
        assert!(config.cache_ttl().is_none());

        let config = AppConfig::default();
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_affinity_params_follow_config() {
        let config = AppConfig { decay_factor: 0.9, significance_threshold: 5, ..Default::default() };
        let params = config.affinity_params();
        assert_eq!(params.significance_threshold, 5);
        assert_eq!(params.saturation_count, 50);
        assert!((params.decay - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_toml_layer_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("decay_factor = 0.95\nretention_days = 14\ncompression = \"gzip\""));
        let config: AppConfig = figment.extract().unwrap();
        assert!((config.decay_factor - 0.95).abs() < f64::EPSILON);
        assert_eq!(config.retention_days, 14);
        assert_eq!(config.compression, CompressionType::Gzip);
        assert!(config.validate().is_ok());
    }
}
