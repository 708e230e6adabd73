// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Central cache management and coordination

use std::sync::Arc;

use super::cache_config::CacheConfig;
use super::invalidation::{
    InvalidationEvent, InvalidationManager, InvalidationResult, InvalidationStats,
};
use super::key::{CollectionCacheKey, EntityCacheKey, QueryCacheKey};
use super::logger::{CacheLogger, CacheLoggerChain, LogCacheLogger, StatisticsCacheLogger};
use super::persister::CachedEntityPersister;
use super::query_cache::QueryCache;
use super::region::{Region, RegionExt};
use super::region_registry::RegionRegistry;
use super::validator::{QueryCacheValidator, TimestampQueryCacheValidator};
use crate::datasource::{EntityStore, Hydrator, QueryExecutor};
use crate::entity::{Entity, EntityRef, ResultRow};
use crate::error::{CacheError, CacheResult};
use crate::metadata::{EntityMetadata, MetadataProvider};
use crate::query::{Query, QueryCacheOptions};
use crate::storage::{create_storage_driver, DynStorageDriver};
use crate::value::IdentifierMap;

const MAX_INVALIDATION_HISTORY: usize = 100;

/// The collaborators the cache sits in front of
#[derive(Clone)]
pub struct DataSource {
    pub executor: Arc<dyn QueryExecutor>,
    pub hydrator: Arc<dyn Hydrator>,
    pub store: Arc<dyn EntityStore>,
    pub metadata: Arc<dyn MetadataProvider>,
}

/// Builder for [`CacheManager`]
pub struct CacheManagerBuilder {
    config: CacheConfig,
    source: DataSource,
    driver: Option<Arc<DynStorageDriver>>,
    loggers: Vec<Arc<dyn CacheLogger>>,
    validator: Option<Arc<dyn QueryCacheValidator>>,
}

impl CacheManagerBuilder {
    /// Use an already opened storage driver instead of the configured one
    pub fn with_driver(mut self, driver: Arc<DynStorageDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Additional sink for hit/miss/put events
    pub fn with_logger(mut self, logger: Arc<dyn CacheLogger>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn QueryCacheValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn build(self) -> CacheResult<CacheManager> {
        self.config.validate()?;

        let driver = match self.driver {
            Some(driver) => driver,
            None => Arc::from(
                create_storage_driver(self.config.storage_type, self.config.storage_path.as_ref())
                    .map_err(|e| CacheError::InvalidConfiguration(e.to_string()))?,
            ),
        };

        let statistics = Arc::new(StatisticsCacheLogger::new());
        let mut chain = CacheLoggerChain::new();
        chain.push(statistics.clone());
        if self.config.log_cache_events {
            chain.push(Arc::new(LogCacheLogger));
        }
        for logger in self.loggers {
            chain.push(logger);
        }
        let logger: Arc<dyn CacheLogger> = Arc::new(chain);

        let config = Arc::new(self.config);
        let registry = Arc::new(RegionRegistry::new(
            driver,
            config.clone(),
            self.source.metadata.clone(),
        ));
        let persister = Arc::new(CachedEntityPersister::new(
            registry.clone(),
            self.source.metadata.clone(),
            self.source.store.clone(),
            logger.clone(),
        ));
        let query_cache = QueryCache::new(
            registry.clone(),
            persister.clone(),
            logger,
            self.validator.unwrap_or_else(|| {
                Arc::new(TimestampQueryCacheValidator) as Arc<dyn QueryCacheValidator>
            }),
        );
        let invalidation = InvalidationManager::new(
            registry.clone(),
            self.source.metadata.clone(),
            MAX_INVALIDATION_HISTORY,
        );

        log::info!(
            "Second-level cache initialized (enabled: {}, storage: {})",
            config.enabled,
            config.storage_type
        );

        Ok(CacheManager {
            config,
            source: self.source,
            registry,
            persister,
            query_cache,
            invalidation,
            statistics,
        })
    }
}

/// Entry point of the second-level cache
pub struct CacheManager {
    config: Arc<CacheConfig>,
    source: DataSource,
    registry: Arc<RegionRegistry>,
    persister: Arc<CachedEntityPersister>,
    query_cache: QueryCache,
    invalidation: InvalidationManager,
    statistics: Arc<StatisticsCacheLogger>,
}

impl CacheManager {
    /// Create new cache manager with configuration
    pub fn new(config: CacheConfig, source: DataSource) -> CacheResult<Self> {
        Self::builder(config, source).build()
    }

    pub fn builder(config: CacheConfig, source: DataSource) -> CacheManagerBuilder {
        CacheManagerBuilder {
            config,
            source,
            driver: None,
            loggers: Vec::new(),
            validator: None,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Per-region hit/miss/put counters
    pub fn statistics(&self) -> Arc<StatisticsCacheLogger> {
        self.statistics.clone()
    }

    pub fn invalidation_stats(&self) -> InvalidationStats {
        self.invalidation.stats()
    }

    /// Latest region invalidations, most recent first
    pub fn recent_invalidations(
        &self,
        limit: Option<usize>,
    ) -> Vec<(InvalidationEvent, InvalidationResult)> {
        self.invalidation.recent_events(limit)
    }

    /// Run a select through the query result cache
    ///
    /// Configuration errors are reported before any region or storage access.
    /// Under NORMAL and GET a complete cached result is returned as is; any
    /// miss falls through to storage. Everything but GET writes the freshly
    /// loaded result back.
    pub fn execute_cacheable(
        &self,
        query: &Query,
        options: &QueryCacheOptions,
    ) -> CacheResult<Vec<ResultRow>> {
        if !self.config.enabled {
            return self.execute(query);
        }

        let region = self.validate_cacheable(query, options)?;
        let key = self.query_key(query, options, region);

        if options.mode.reads() {
            if let Some(rows) = self.query_cache.get(&key, &query.shape)? {
                return Ok(rows);
            }
        }

        let rows = self.execute(query)?;

        if options.mode.writes() {
            self.query_cache
                .put(&key, &query.shape, &rows, options.mode)?;
        }

        Ok(rows)
    }

    /// Run a query against storage, bypassing the cache
    pub fn execute(&self, query: &Query) -> CacheResult<Vec<ResultRow>> {
        let raw = self.source.executor.execute_query(query)?;
        Ok(self.source.hydrator.hydrate(raw, &query.shape)?)
    }

    /// Run a mutating statement; with the evict hint set, the written types'
    /// regions are evicted once it succeeds
    pub fn execute_statement(&self, statement: &Query) -> CacheResult<u64> {
        let evict = self.config.enabled && statement.hints.evict_on_success;
        if evict {
            for entity_type in &statement.target_types {
                self.source.metadata.require(entity_type)?;
            }
        }

        let affected_rows = self.source.executor.execute_statement(statement)?;

        if evict {
            self.invalidation
                .handle_event(InvalidationEvent::BulkStatement {
                    kind: statement.kind,
                    targets: statement.target_types.clone(),
                    affected_rows,
                })?;
        }
        Ok(affected_rows)
    }

    pub fn load_entity(
        &self,
        entity_type: &str,
        identifier: &IdentifierMap,
    ) -> CacheResult<Option<Entity>> {
        if !self.config.enabled {
            return Ok(self.source.store.load(entity_type, identifier)?);
        }
        self.persister.load_by_id(entity_type, identifier)
    }

    pub fn load_collection(
        &self,
        owner: &EntityCacheKey,
        association: &str,
    ) -> CacheResult<Vec<Entity>> {
        if !self.config.enabled {
            return Ok(self.source.store.load_collection(owner, association)?);
        }
        self.persister.load_collection(owner, association)
    }

    /// Materialize a possibly unresolved reference
    pub fn resolve(&self, reference: &EntityRef) -> CacheResult<Option<Entity>> {
        if !self.config.enabled {
            return match reference {
                EntityRef::Resolved(entity) => Ok(Some(entity.as_ref().clone())),
                EntityRef::Unresolved(key) => {
                    Ok(self.source.store.load(key.entity_type(), key.identifier())?)
                }
            };
        }
        self.persister.resolve(reference)
    }

    pub fn update_entity(&self, entity: &Entity) -> CacheResult<()> {
        if !self.config.enabled {
            return Ok(self.source.store.update(entity)?);
        }
        self.persister.update(entity)
    }

    pub fn delete_entity(&self, entity: &Entity) -> CacheResult<()> {
        if !self.config.enabled {
            return Ok(self.source.store.delete(entity)?);
        }
        self.persister.delete(entity)
    }

    pub fn contains_entity(&self, entity_type: &str, identifier: &IdentifierMap) -> CacheResult<bool> {
        let key = EntityCacheKey::new(entity_type, identifier.clone())?;
        Ok(self.entity_cache_region(entity_type)?.contains_or_false(&key))
    }

    pub fn contains_collection(
        &self,
        owner_type: &str,
        association: &str,
        owner_identifier: &IdentifierMap,
    ) -> CacheResult<bool> {
        let owner = EntityCacheKey::new(owner_type, owner_identifier.clone())?;
        let key = CollectionCacheKey::new(&owner, association);
        Ok(self
            .collection_cache_region(owner_type, association)?
            .contains_or_false(&key))
    }

    /// Whether a result for `query` is stored, stale or not
    pub fn contains_query(&self, query: &Query, options: &QueryCacheOptions) -> CacheResult<bool> {
        let region = self.query_cache_region(options.region.as_deref())?;
        let key = self.query_key(query, options, region.name());
        Ok(region.contains_or_false(&key))
    }

    pub fn evict_entity(&self, entity_type: &str, identifier: &IdentifierMap) -> CacheResult<()> {
        let key = EntityCacheKey::new(entity_type, identifier.clone())?;
        self.entity_cache_region(entity_type)?.evict_quietly(&key);
        Ok(())
    }

    pub fn evict_entity_region(&self, entity_type: &str) -> CacheResult<()> {
        self.entity_cache_region(entity_type)?.evict_all_quietly();
        Ok(())
    }

    pub fn evict_entity_regions(&self) -> CacheResult<()> {
        for meta in self.cacheable_types() {
            self.evict_entity_region(&meta.name)?;
        }
        Ok(())
    }

    pub fn evict_collection(
        &self,
        owner_type: &str,
        association: &str,
        owner_identifier: &IdentifierMap,
    ) -> CacheResult<()> {
        let owner = EntityCacheKey::new(owner_type, owner_identifier.clone())?;
        self.collection_cache_region(owner_type, association)?
            .evict_quietly(&CollectionCacheKey::new(&owner, association));
        Ok(())
    }

    pub fn evict_collection_region(&self, owner_type: &str, association: &str) -> CacheResult<()> {
        self.collection_cache_region(owner_type, association)?
            .evict_all_quietly();
        Ok(())
    }

    pub fn evict_collection_regions(&self) -> CacheResult<()> {
        for meta in self.cacheable_types() {
            for association in meta.to_many_associations() {
                self.evict_collection_region(&meta.name, &association.field)?;
            }
        }
        Ok(())
    }

    /// Clear one query region; `None` selects the default one
    pub fn evict_query_region(&self, region: Option<&str>) -> CacheResult<()> {
        self.query_cache_region(region)?.evict_all_quietly();
        Ok(())
    }

    pub fn evict_query_regions(&self) -> CacheResult<()> {
        for name in self.registry.query_region_names() {
            self.registry.region(&name)?.evict_all_quietly();
        }
        Ok(())
    }

    /// Clear every region, including ones only present in the backend
    pub fn evict_all_regions(&self) -> CacheResult<()> {
        for name in self.registry.region_names() {
            self.registry.region(&name)?.evict_all_quietly();
        }
        Ok(())
    }

    pub fn entity_cache_region(&self, entity_type: &str) -> CacheResult<Arc<dyn Region>> {
        self.require_cacheable(entity_type)?;
        self.registry.entity_region(entity_type)
    }

    pub fn collection_cache_region(
        &self,
        owner_type: &str,
        association: &str,
    ) -> CacheResult<Arc<dyn Region>> {
        let meta = self.require_cacheable(owner_type)?;
        if meta.association(association).is_none() {
            return Err(CacheError::UnknownAssociation {
                entity_type: owner_type.to_string(),
                field: association.to_string(),
            });
        }
        self.registry.collection_region(owner_type, association)
    }

    pub fn query_cache_region(&self, region: Option<&str>) -> CacheResult<Arc<dyn Region>> {
        self.registry.query_region(region)
    }

    /// Flush pending backend writes
    pub fn flush(&self) {
        self.registry.flush();
    }

    fn query_key(
        &self,
        query: &Query,
        options: &QueryCacheOptions,
        region: impl Into<String>,
    ) -> QueryCacheKey {
        let lifetime = options
            .lifetime
            .unwrap_or(self.config.default_query_lifetime);
        QueryCacheKey::new(query.fingerprint(), lifetime, region)
    }

    fn require_cacheable(&self, entity_type: &str) -> CacheResult<Arc<EntityMetadata>> {
        let meta = self.source.metadata.require(entity_type)?;
        if !meta.is_cacheable() {
            return Err(CacheError::NonCacheableEntity(entity_type.to_string()));
        }
        Ok(meta)
    }

    fn cacheable_types(&self) -> Vec<Arc<EntityMetadata>> {
        self.source
            .metadata
            .entity_types()
            .iter()
            .filter_map(|t| self.source.metadata.metadata_for(t))
            .filter(|m| m.is_cacheable())
            .collect()
    }

    /// Check everything that makes a query non-cacheable; returns the query
    /// region name
    fn validate_cacheable(&self, query: &Query, options: &QueryCacheOptions) -> CacheResult<String> {
        if !query.is_select() {
            return Err(CacheError::NonSelectStatement);
        }
        if query.partial {
            return Err(CacheError::PartialEntities);
        }

        let region = self.registry.query_region_name(options.region.as_deref())?;

        for result in query.shape.entity_results() {
            let meta = self.require_cacheable(&result.entity_type)?;
            for join in &result.joins {
                match meta.association(&join.field) {
                    Some(association) if association.target == join.target.entity_type => {}
                    _ => {
                        return Err(CacheError::UnknownAssociation {
                            entity_type: meta.name.clone(),
                            field: join.field.clone(),
                        })
                    }
                }
            }
        }

        Ok(region)
    }
}
