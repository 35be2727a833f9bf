//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

/// Upper bound for configured lifetimes, in seconds (100 years).
const MAX_LIFETIME_SECS: u64 = 100 * 365 * 86_400;

/// Upper bound for `retention_days`.
const MAX_RETENTION_DAYS: u32 = 100 * 365;

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `decay_factor` is not strictly between 0 and 1
    /// - `significance_threshold`, `saturation_count`, `retention_days`,
    ///   `prune_batch_size` or `adjacency_window_secs` is 0
    /// - `delta_max_ratio` is outside (0, 1]
    /// - a share TTL is 0 or the default exceeds the maximum
    /// - `retention_days`, `cache_ttl_secs` or `max_share_ttl_secs` exceeds
    ///   100 years
    /// - a job interval is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.decay_factor > 0.0 && self.decay_factor < 1.0) {
            return Err(invalid("decay_factor", "must be strictly between 0 and 1"));
        }
        if self.decay_factor < 0.5 {
            tracing::warn!(
                decay_factor = self.decay_factor,
                "Low decay factor; affinity scores will track the latest batch closely"
            );
        }

        if self.significance_threshold == 0 {
            return Err(invalid("significance_threshold", "must be greater than 0"));
        }
        if self.saturation_count == 0 {
            return Err(invalid("saturation_count", "must be greater than 0"));
        }
        if self.retention_days == 0 {
            return Err(invalid("retention_days", "must be greater than 0"));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(invalid("retention_days", "must not exceed 100 years"));
        }
        if self.prune_batch_size == 0 {
            return Err(invalid("prune_batch_size", "must be greater than 0"));
        }
        if self.adjacency_window_secs == 0 {
            return Err(invalid("adjacency_window_secs", "must be greater than 0"));
        }

        if !(self.delta_max_ratio > 0.0 && self.delta_max_ratio <= 1.0) {
            return Err(invalid("delta_max_ratio", "must be in (0, 1]"));
        }

        for (field, secs) in [("cache_ttl_secs", self.cache_ttl_secs), ("max_share_ttl_secs", self.max_share_ttl_secs)] {
            if secs > MAX_LIFETIME_SECS {
                return Err(invalid(field, "must not exceed 100 years"));
            }
        }

        if self.share_ttl_secs == 0 {
            return Err(invalid("share_ttl_secs", "must be greater than 0"));
        }
        if self.share_ttl_secs > self.max_share_ttl_secs {
            return Err(invalid("share_ttl_secs", "must not exceed max_share_ttl_secs"));
        }

        if self.related_limit == 0 {
            return Err(invalid("related_limit", "must be greater than 0"));
        }

        for (field, secs) in [
            ("prune_interval_secs", self.prune_interval_secs),
            ("aggregate_interval_secs", self.aggregate_interval_secs),
            ("affinity_interval_secs", self.affinity_interval_secs),
            ("share_sweep_interval_secs", self.share_sweep_interval_secs),
            ("cache_sweep_interval_secs", self.cache_sweep_interval_secs),
        ] {
            if secs == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_decay_bounds() {
        for decay in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            let config = AppConfig { decay_factor: decay, ..Default::default() };
            let result = config.validate();
            assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "decay_factor"));
        }
    }

    #[test]
    fn test_validate_zero_threshold() {
        let config = AppConfig { significance_threshold: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "significance_threshold"));
    }

    #[test]
    fn test_validate_zero_batch() {
        let config = AppConfig { prune_batch_size: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "prune_batch_size"));
    }

    #[test]
    fn test_validate_delta_ratio() {
        let config = AppConfig { delta_max_ratio: 0.0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = AppConfig { delta_max_ratio: 1.0, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_share_ttl_above_max() {
        let config = AppConfig { share_ttl_secs: 10, max_share_ttl_secs: 5, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "share_ttl_secs"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = AppConfig { affinity_interval_secs: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "affinity_interval_secs"));
    }

    #[test]
    fn test_validate_lifetime_upper_bounds() {
        let config = AppConfig { retention_days: 36_501, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "retention_days"));

        let config = AppConfig { cache_ttl_secs: 1_000_000_000_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_ttl_secs"));

        let config = AppConfig { max_share_ttl_secs: u64::MAX, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_share_ttl_secs"));

        let config = AppConfig { retention_days: 36_500, cache_ttl_secs: 3_153_600_000, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_cache_ttl_is_valid() {
        let config = AppConfig { cache_ttl_secs: 0, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
