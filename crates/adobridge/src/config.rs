//! Engine configuration
//!
//! Every knob has a documented default, so an empty document is a valid
//! configuration:
//!
//! ```yaml
//! cache:
//!   max_entries: 10000
//!   sweep_interval_secs: 300
//! query:
//!   cache_ttl_secs: 300
//!   slow_query_threshold_ms: 1000
//! pools:
//!   providers:
//!     sqlserver:
//!       max_connections: 20
//!       acquire_timeout_secs: 15
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pool::PoolSettings;
use crate::provider::ProviderKind;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Query-result cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Query execution policy
    #[serde(default)]
    pub query: QueryConfig,
    /// Per-provider pool sizing
    #[serde(default)]
    pub pools: PoolsConfig,
}

impl EngineConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(Error::config("cache.max_entries must be at least 1"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(Error::config("cache.sweep_interval_secs must be at least 1"));
        }
        for (provider, overrides) in &self.pools.providers {
            overrides
                .apply(PoolSettings::for_provider(*provider))
                .validate()
                .map_err(|e| Error::config(format!("pools.providers.{}: {}", provider.tag(), e)))?;
        }
        Ok(())
    }
}

/// Query-result cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Local-tier entry ceiling enforced by the sweep
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// TTL used by `set_default`
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Fixed per-entry overhead counted in memory estimates
    #[serde(default = "default_entry_overhead_bytes")]
    pub entry_overhead_bytes: usize,
}

fn default_max_entries() -> usize {
    10_000
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_entry_overhead_bytes() -> usize {
    64
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_ttl_secs: default_ttl_secs(),
            entry_overhead_bytes: default_entry_overhead_bytes(),
        }
    }
}

impl CacheConfig {
    /// Sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Set entry ceiling
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set sweep interval
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }
}

/// Query execution policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Cache read-only results at all
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// TTL of cached results
    #[serde(default = "default_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Results with this many rows or more are not cached
    #[serde(default = "default_max_cached_rows")]
    pub max_cached_rows: usize,
    /// Executions slower than this are logged as warnings
    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_max_cached_rows() -> usize {
    10_000
}
fn default_slow_query_threshold_ms() -> u64 {
    1000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: default_ttl_secs(),
            max_cached_rows: default_max_cached_rows(),
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
        }
    }
}

impl QueryConfig {
    /// Slow-query threshold as Duration
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}

/// Pool configuration for every provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// Overrides of the provider defaults
    #[serde(default)]
    pub providers: HashMap<ProviderKind, PoolOverrides>,
    /// Upper bound on closing one pool during shutdown
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
}

fn default_close_timeout_secs() -> u64 {
    10
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            close_timeout_secs: default_close_timeout_secs(),
        }
    }
}

impl PoolsConfig {
    /// Close timeout as Duration
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    /// Override one provider's sizing
    pub fn with_provider(mut self, provider: ProviderKind, overrides: PoolOverrides) -> Self {
        self.providers.insert(provider, overrides);
        self
    }
}

/// Partial pool settings; unset fields keep the provider default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct PoolOverrides {
    #[serde(default)]
    pub min_connections: Option<usize>,
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
    #[serde(default)]
    pub create_timeout_secs: Option<u64>,
    #[serde(default)]
    pub destroy_timeout_secs: Option<u64>,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub test_on_borrow: Option<bool>,
}

impl PoolOverrides {
    /// Layer these overrides on top of `base`
    pub fn apply(&self, base: PoolSettings) -> PoolSettings {
        PoolSettings {
            min_connections: self.min_connections.unwrap_or(base.min_connections),
            max_connections: self.max_connections.unwrap_or(base.max_connections),
            acquire_timeout: self
                .acquire_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.acquire_timeout),
            create_timeout: self
                .create_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.create_timeout),
            destroy_timeout: self
                .destroy_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.destroy_timeout),
            idle_timeout: self
                .idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.idle_timeout),
            test_on_borrow: self.test_on_borrow.unwrap_or(base.test_on_borrow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.query.cache_ttl_secs, 300);
        assert_eq!(config.query.slow_query_threshold(), Duration::from_millis(1000));
        assert_eq!(config.query.max_cached_rows, 10_000);
    }

    #[test]
    fn test_provider_overrides() {
        let yaml = r#"
pools:
  providers:
    sqlserver:
      max_connections: 20
      acquire_timeout_secs: 15
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        let overrides = &config.pools.providers[&ProviderKind::SqlServer];
        let settings = overrides.apply(PoolSettings::for_provider(ProviderKind::SqlServer));

        assert_eq!(settings.max_connections, 20);
        assert_eq!(settings.min_connections, 2);
        assert_eq!(settings.acquire_timeout, Duration::from_secs(15));
        assert_eq!(settings.idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(EngineConfig::from_yaml_str("cache:\n  max_entries: 0\n").is_err());

        let yaml = "pools:\n  providers:\n    mysql:\n      min_connections: 50\n";
        let err = EngineConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("mysql"));

        assert!(EngineConfig::from_yaml_str("cache: [").is_err());
    }
}
