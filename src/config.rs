//! Cache configuration.
//!
//! Configuration can be loaded from a JSON file, environment variables, or
//! built programmatically with the `with_*` setters.

use crate::error::{CacheError, Result};
use crate::resources::{LoadStrategy, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable overriding [`CacheConfig::max_cost`]
pub const ENV_MAX_COST: &str = "RESOURCE_CACHE_MAX_COST";
/// Environment variable overriding [`CacheConfig::worker_threads`]
pub const ENV_WORKERS: &str = "RESOURCE_CACHE_WORKERS";

/// Settings for a [`ResourceCache`](crate::ResourceCache)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Cost budget in cost units (1 unit = 1 MiB of payload)
    pub max_cost: u64,
    /// Background loader threads
    pub worker_threads: usize,
    /// Whether `resource()` on an empty handle schedules a reload
    pub reload_on_access: bool,
    /// Kinds loaded on the calling thread instead of the worker pool
    pub inline_kinds: Vec<ResourceKind>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cost: 512,
            worker_threads: default_worker_threads(),
            reload_on_access: true,
            inline_kinds: vec![ResourceKind::ShaderProgram, ResourceKind::Script],
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

impl CacheConfig {
    pub fn new(max_cost: u64) -> Self {
        Self::default().with_max_cost(max_cost)
    }

    /// Config that loads every kind inline; loads complete before
    /// `load_resource` returns (finalize still runs separately)
    pub fn all_inline(max_cost: u64) -> Self {
        Self::new(max_cost).with_inline_kinds(ResourceKind::ALL.to_vec())
    }

    pub fn with_max_cost(mut self, max_cost: u64) -> Self {
        self.max_cost = max_cost;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_reload_on_access(mut self, enabled: bool) -> Self {
        self.reload_on_access = enabled;
        self
    }

    pub fn with_inline_kinds(mut self, kinds: Vec<ResourceKind>) -> Self {
        self.inline_kinds = kinds;
        self
    }

    pub fn is_inline(&self, kind: ResourceKind) -> bool {
        self.inline_kinds.contains(&kind)
    }

    pub fn strategy_for(&self, kind: ResourceKind) -> LoadStrategy {
        if self.is_inline(kind) {
            LoadStrategy::Inline
        } else {
            LoadStrategy::Background
        }
    }

    /// Loads configuration from a JSON file.
    ///
    /// Expected format (every key optional):
    /// ```json
    /// { "maxCost": 512, "workerThreads": 4, "reloadOnAccess": true, "inlineKinds": [7, 8] }
    /// ```
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)
            .map_err(|e| CacheError::ConfigError(format!("invalid cache config: {e}")))?;
        config.validate()
    }

    /// Loads configuration from `RESOURCE_CACHE_MAX_COST` and
    /// `RESOURCE_CACHE_WORKERS`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_COST) {
            config.max_cost = value
                .trim()
                .parse::<u64>()
                .map_err(|_| CacheError::ConfigError(format!("invalid {ENV_MAX_COST}: {value}")))?;
        }

        if let Some(value) = lookup(ENV_WORKERS) {
            config.worker_threads = value
                .trim()
                .parse::<usize>()
                .map_err(|_| CacheError::ConfigError(format!("invalid {ENV_WORKERS}: {value}")))?;
        }

        config.validate()
    }

    fn validate(mut self) -> Result<Self> {
        if self.worker_threads == 0 {
            return Err(CacheError::ConfigError(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.max_cost == 0 {
            tracing::warn!("resource cache max_cost is 0; every removable resource will be evicted");
        }
        self.inline_kinds.dedup();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_cost, 512);
        assert!(config.worker_threads >= 1 && config.worker_threads <= 4);
        assert!(config.reload_on_access);
        assert!(config.is_inline(ResourceKind::Script));
        assert!(!config.is_inline(ResourceKind::Texture));
        assert_eq!(config.strategy_for(ResourceKind::Mesh), LoadStrategy::Background);
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::new(64)
            .with_worker_threads(0)
            .with_reload_on_access(false);
        assert_eq!(config.max_cost, 64);
        assert_eq!(config.worker_threads, 1);
        assert!(!config.reload_on_access);
        assert!(CacheConfig::all_inline(8).is_inline(ResourceKind::Model));
    }

    #[test]
    fn test_from_json_str() {
        let config =
            CacheConfig::from_json_str(r#"{ "maxCost": 128, "inlineKinds": [3] }"#).unwrap();
        assert_eq!(config.max_cost, 128);
        assert_eq!(config.inline_kinds, vec![ResourceKind::Mesh]);
        assert!(config.reload_on_access);

        assert!(matches!(
            CacheConfig::from_json_str(r#"{ "maxCost": "lots" }"#),
            Err(CacheError::ConfigError(_))
        ));
        assert!(CacheConfig::from_json_str(r#"{ "workerThreads": 0 }"#).is_err());
    }

    #[test]
    fn test_from_vars() {
        let config = CacheConfig::from_vars(|key| match key {
            ENV_MAX_COST => Some("2048".to_string()),
            ENV_WORKERS => Some(" 2 ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.max_cost, 2048);
        assert_eq!(config.worker_threads, 2);

        let invalid = CacheConfig::from_vars(|key| (key == ENV_MAX_COST).then(|| "-1".to_string()));
        assert!(matches!(invalid, Err(CacheError::ConfigError(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            CacheConfig::from_json_file("does/not/exist.json"),
            Err(CacheError::IoError(_))
        ));
    }
}
