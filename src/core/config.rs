//! Registry configuration
//!
//! [`RegistryConfig`] controls how the registry uses its on-disk cache and how
//! aggressively loaded objects may be reclaimed. [`CacheEnvironment`] carries
//! the values a cache must have been written under to be trusted.

use crate::core::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for the registry and its object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Read and write the binary cache at all
    pub cache_enabled: bool,

    /// Load objects from the cache on demand instead of reading
    /// everything at startup
    pub lazy_cache_loading: bool,

    /// Allow cache-loaded objects to be reclaimed
    /// When false every loaded object is pinned for the life of the registry
    pub flushing_enabled: bool,

    /// Capacity of the reclaimable object tier
    pub object_cache_capacity: usize,

    /// Capacity of the reclaimable extra data tier
    pub extra_cache_capacity: usize,

    /// Verify the registry stamp of the module set against the cache
    /// When false the stamp is written as 0 and never compared
    pub check_config: bool,

    /// Log every change event at debug level
    pub debug_events: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            cache_enabled: true,
            lazy_cache_loading: true,
            flushing_enabled: true,
            object_cache_capacity: 4096,
            extra_cache_capacity: 1024,
            check_config: false,
            debug_events: false,
        }
    }
}

impl RegistryConfig {
    /// Config that never touches the disk
    pub fn in_memory() -> Self {
        RegistryConfig {
            cache_enabled: false,
            ..Default::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig =
            toml::from_str(content).map_err(|e| RegistryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RegistryError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.object_cache_capacity == 0 {
            return Err(RegistryError::Config(
                "object_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.extra_cache_capacity == 0 {
            return Err(RegistryError::Config(
                "extra_cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stamps a cache must have been written under
///
/// A cache written by another installation, or for another platform or
/// locale, is rejected and rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEnvironment {
    pub install_stamp: i64,
    pub os: String,
    pub ws: String,
    pub nl: String,
}

impl Default for CacheEnvironment {
    fn default() -> Self {
        CacheEnvironment {
            install_stamp: 0,
            os: std::env::consts::OS.to_string(),
            ws: String::new(),
            nl: "en_US".to_string(),
        }
    }
}

impl CacheEnvironment {
    pub fn new(install_stamp: i64, os: impl Into<String>, ws: impl Into<String>, nl: impl Into<String>) -> Self {
        CacheEnvironment {
            install_stamp,
            os: os.into(),
            ws: ws.into(),
            nl: nl.into(),
        }
    }

    pub fn with_locale(mut self, nl: impl Into<String>) -> Self {
        self.nl = nl.into();
        self
    }
}
