// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Region registry
//!
//! Resolves region names for entity types, collections and queries, and hands
//! out one shared region instance per name. Every region is backed by the tree
//! of the same name in the configured storage driver.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::cache_config::CacheConfig;
use super::region::{DefaultRegion, Region, UnavailableRegion};
use crate::error::{CacheError, CacheResult};
use crate::metadata::MetadataProvider;
use crate::storage::DynStorageDriver;

static REGION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid region name pattern"));

/// Reject names that cannot be used as a region (and backend tree) name
pub fn validate_region_name(name: &str) -> CacheResult<()> {
    if REGION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(CacheError::InvalidRegionName(name.to_string()))
    }
}

/// Region name derived from an entity type name
pub fn default_entity_region_name(entity_type: &str) -> String {
    entity_type
        .replace("::", "_")
        .replace('\\', "_")
        .to_lowercase()
}

pub struct RegionRegistry {
    driver: Arc<DynStorageDriver>,
    config: Arc<CacheConfig>,
    metadata: Arc<dyn MetadataProvider>,
    regions: RwLock<HashMap<String, Arc<dyn Region>>>,
    query_regions: RwLock<BTreeSet<String>>,
}

impl RegionRegistry {
    pub fn new(
        driver: Arc<DynStorageDriver>,
        config: Arc<CacheConfig>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Self {
        Self {
            driver,
            config,
            metadata,
            regions: RwLock::new(HashMap::new()),
            query_regions: RwLock::new(BTreeSet::new()),
        }
    }

    /// Shared region for `name`, created on first use
    pub fn region(&self, name: &str) -> CacheResult<Arc<dyn Region>> {
        validate_region_name(name)?;

        if let Some(region) = self.regions.read().get(name) {
            return Ok(region.clone());
        }

        let mut regions = self.regions.write();
        if let Some(region) = regions.get(name) {
            return Ok(region.clone());
        }

        match self.driver.open_tree(name) {
            Ok(tree) => {
                let region: Arc<dyn Region> = Arc::new(DefaultRegion::new(
                    name,
                    tree,
                    self.config.lifetime_for(name),
                ));
                log::debug!("Created cache region '{}'", name);
                regions.insert(name.to_string(), region.clone());
                Ok(region)
            }
            Err(e) => {
                // Not memoized; the next request retries the backend
                log::warn!("Cache region '{}' is unavailable: {}", name, e);
                Ok(Arc::new(UnavailableRegion::new(name, e.to_string())))
            }
        }
    }

    /// Region name for an entity type: configured override, then the
    /// metadata's explicit region, then the name derived from the type
    pub fn entity_region_name(&self, entity_type: &str) -> CacheResult<String> {
        if let Some(name) = self.config.entity_regions.get(entity_type) {
            return Ok(name.clone());
        }

        let metadata = self.metadata.require(entity_type)?;
        let name = metadata
            .cache
            .as_ref()
            .and_then(|c| c.region.clone())
            .unwrap_or_else(|| default_entity_region_name(entity_type));
        Ok(name)
    }

    pub fn entity_region(&self, entity_type: &str) -> CacheResult<Arc<dyn Region>> {
        self.region(&self.entity_region_name(entity_type)?)
    }

    pub fn collection_region_name(&self, owner_type: &str, association: &str) -> CacheResult<String> {
        Ok(format!(
            "{}__{}",
            self.entity_region_name(owner_type)?,
            association
        ))
    }

    pub fn collection_region(
        &self,
        owner_type: &str,
        association: &str,
    ) -> CacheResult<Arc<dyn Region>> {
        self.region(&self.collection_region_name(owner_type, association)?)
    }

    /// Resolve a query region name without touching the backend
    pub fn query_region_name(&self, name: Option<&str>) -> CacheResult<String> {
        let name = name.unwrap_or(&self.config.default_query_region);
        validate_region_name(name)?;
        Ok(name.to_string())
    }

    /// Query region; `None` selects the default query region
    pub fn query_region(&self, name: Option<&str>) -> CacheResult<Arc<dyn Region>> {
        let name = self.query_region_name(name)?;
        let region = self.region(&name)?;
        self.query_regions.write().insert(name);
        Ok(region)
    }

    /// Every query region: the ones used so far, the default one, and any
    /// backend region that no entity or collection owns
    ///
    /// A persistent backend keeps query regions written by earlier processes,
    /// so bulk eviction has to find them without this process opening them.
    pub fn query_region_names(&self) -> Vec<String> {
        let mut names = self.query_regions.read().clone();
        names.insert(self.config.default_query_region.clone());

        let owned = self.owned_region_names();
        names.extend(
            self.backend_region_names()
                .into_iter()
                .filter(|name| !owned.contains(name)),
        );
        names.into_iter().collect()
    }

    /// Regions known to this process or present in the backend
    pub fn region_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.regions.read().keys().cloned().collect();
        names.extend(self.backend_region_names());
        names.into_iter().collect()
    }

    fn backend_region_names(&self) -> Vec<String> {
        match self.driver.list_trees() {
            Ok(trees) => trees
                .into_iter()
                .filter(|t| REGION_NAME.is_match(t))
                .collect(),
            Err(e) => {
                log::warn!("Could not list cache regions in the backend: {}", e);
                Vec::new()
            }
        }
    }

    /// Entity and collection region names of every cacheable type
    fn owned_region_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for entity_type in self.metadata.entity_types() {
            let Some(meta) = self.metadata.metadata_for(&entity_type) else {
                continue;
            };
            if !meta.is_cacheable() {
                continue;
            }
            let Ok(region) = self.entity_region_name(&entity_type) else {
                continue;
            };
            for association in meta.to_many_associations() {
                names.insert(format!("{}__{}", region, association.field));
            }
            names.insert(region);
        }
        names
    }

    pub fn flush(&self) {
        if let Err(e) = self.driver.flush() {
            log::warn!("Cache backend flush failed: {}", e);
        }
    }
}
