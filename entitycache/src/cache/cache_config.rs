// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache configuration and policies

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::region_registry::validate_region_name;
use crate::error::{CacheError, CacheResult};
use crate::storage::StorageType;

/// Default name of the query result region
pub const DEFAULT_QUERY_REGION: &str = "query_cache_region";

/// Global cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable/disable caching entirely; when off every request goes to storage
    pub enabled: bool,

    /// Backing store for all regions
    pub storage_type: StorageType,

    /// Directory for on-disk backends
    pub storage_path: Option<PathBuf>,

    /// Default entry lifetime for entity and collection regions
    pub default_lifetime: Option<Duration>,

    /// Default query result lifetime in seconds; 0 never goes stale
    pub default_query_lifetime: u64,

    /// Region used by cacheable queries without an explicit region
    pub default_query_region: String,

    /// Per-region lifetime overrides
    pub region_lifetimes: HashMap<String, Duration>,

    /// Entity type to region name overrides
    pub entity_regions: HashMap<String, String>,

    /// Also emit every hit/miss/put as a debug log line
    pub log_cache_events: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_type: StorageType::Memory,
            storage_path: None,
            default_lifetime: None,
            default_query_lifetime: 0,
            default_query_region: DEFAULT_QUERY_REGION.to_string(),
            region_lifetimes: HashMap::new(),
            entity_regions: HashMap::new(),
            log_cache_events: false,
        }
    }
}

impl CacheConfig {
    /// Process-local regions
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Regions persisted in an embedded store under `path`
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_type: StorageType::Sled,
            storage_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Pass-through configuration: nothing is cached
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_default_query_lifetime(mut self, seconds: u64) -> Self {
        self.default_query_lifetime = seconds;
        self
    }

    pub fn with_region_lifetime(mut self, region: impl Into<String>, lifetime: Duration) -> Self {
        self.region_lifetimes.insert(region.into(), lifetime);
        self
    }

    pub fn with_entity_region(
        mut self,
        entity_type: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        self.entity_regions.insert(entity_type.into(), region.into());
        self
    }

    /// Effective default lifetime of a region
    pub fn lifetime_for(&self, region: &str) -> Option<Duration> {
        self.region_lifetimes
            .get(region)
            .copied()
            .or(self.default_lifetime)
    }

    /// Parse a JSON configuration; missing keys take their defaults
    pub fn from_json(json: &str) -> CacheResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.storage_type == StorageType::Sled && self.storage_path.is_none() {
            return Err(CacheError::InvalidConfiguration(
                "sled storage requires storage_path".to_string(),
            ));
        }

        validate_region_name(&self.default_query_region)?;
        for region in self.region_lifetimes.keys() {
            validate_region_name(region)?;
        }
        for region in self.entity_regions.values() {
            validate_region_name(region)?;
        }

        Ok(())
    }
}
