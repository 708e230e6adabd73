// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query result cache
//!
//! A cached query result stores only keys. Reading it back resolves every
//! entity through the entity regions and every fetch-joined collection through
//! the collection regions. If anything is missing the whole result is a miss:
//! a result is either reconstructed completely or not at all.
//!
//! Writes go bottom-up. Entities and collections are stored before the query
//! entry, so a reader that finds the query entry can resolve what it refers to.

use std::sync::Arc;

use super::entry::{
    CacheEntry, CachedAssociation, CachedColumn, CachedEntity, CachedRow, QueryCacheEntry,
};
use super::key::{CacheKey, CollectionCacheKey, QueryCacheKey};
use super::logger::CacheLogger;
use super::persister::CachedEntityPersister;
use super::region::RegionExt;
use super::region_registry::RegionRegistry;
use super::validator::QueryCacheValidator;
use super::CacheMode;
use crate::entity::{Association, Collection, Entity, EntityRef, ResultColumn, ResultRow};
use crate::error::CacheResult;
use crate::query::{ColumnShape, EntityResult, ResultShape};

pub struct QueryCache {
    registry: Arc<RegionRegistry>,
    persister: Arc<CachedEntityPersister>,
    logger: Arc<dyn CacheLogger>,
    validator: Arc<dyn QueryCacheValidator>,
}

impl QueryCache {
    pub fn new(
        registry: Arc<RegionRegistry>,
        persister: Arc<CachedEntityPersister>,
        logger: Arc<dyn CacheLogger>,
        validator: Arc<dyn QueryCacheValidator>,
    ) -> Self {
        Self {
            registry,
            persister,
            logger,
            validator,
        }
    }

    /// Reconstruct a cached result, or `None` on any kind of miss
    pub fn get(
        &self,
        key: &QueryCacheKey,
        shape: &ResultShape,
    ) -> CacheResult<Option<Vec<ResultRow>>> {
        let region = self.registry.query_region(Some(&key.region))?;

        let entry = match region.get_or_miss(key).and_then(CacheEntry::into_query) {
            Some(entry) => entry,
            None => {
                self.logger.on_miss(region.name(), key);
                return Ok(None);
            }
        };

        if entry.shape != *shape {
            log::debug!("Query entry {} was cached with another shape", key.hash);
            self.logger.on_miss(region.name(), key);
            return Ok(None);
        }

        if !self.validator.is_valid(key, &entry) {
            region.evict_quietly(key);
            self.logger.on_miss(region.name(), key);
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(entry.rows.len());
        for row in &entry.rows {
            match self.rebuild_row(row, shape)? {
                Some(row) => rows.push(row),
                None => {
                    self.logger.on_miss(region.name(), key);
                    return Ok(None);
                }
            }
        }

        self.logger.on_hit(region.name(), key);
        Ok(Some(rows))
    }

    /// Cache a freshly hydrated result
    ///
    /// Entities are written when their region lacks them, or always under
    /// [`CacheMode::Refresh`]. The query entry itself is skipped when the
    /// result holds something that cannot be reconstructed later (an
    /// unresolved fetch-joined reference or an incomplete collection).
    /// Returns whether the query entry was written.
    pub fn put(
        &self,
        key: &QueryCacheKey,
        shape: &ResultShape,
        rows: &[ResultRow],
        mode: CacheMode,
    ) -> CacheResult<bool> {
        let overwrite = mode == CacheMode::Refresh;
        let mut cached_rows = Vec::with_capacity(rows.len());

        for row in rows {
            match self.cache_row(row, shape, overwrite)? {
                Some(cached) => cached_rows.push(cached),
                None => {
                    log::debug!("Query {} holds non-cacheable data; entry skipped", key.hash);
                    return Ok(false);
                }
            }
        }

        let region = self.registry.query_region(Some(&key.region))?;
        let entry = QueryCacheEntry::new(cached_rows, shape.clone());
        let written = region.put_or_drop(key, entry.into(), None);
        if written {
            self.logger.on_put(region.name(), key);
        }
        Ok(written)
    }

    fn rebuild_row(&self, row: &CachedRow, shape: &ResultShape) -> CacheResult<Option<ResultRow>> {
        match (row, shape) {
            (CachedRow::Entity(cached), ResultShape::Entity(result)) => {
                Ok(self.rebuild_entity(cached, result)?.map(ResultRow::Entity))
            }
            (CachedRow::Tuple(columns), ResultShape::Tuple(shapes))
                if columns.len() == shapes.len() =>
            {
                let mut rebuilt = Vec::with_capacity(columns.len());
                for (column, column_shape) in columns.iter().zip(shapes) {
                    match (column, column_shape) {
                        (CachedColumn::Entity(cached), ColumnShape::Entity(result)) => {
                            match self.rebuild_entity(cached, result)? {
                                Some(entity) => rebuilt.push(ResultColumn::Entity(entity)),
                                None => return Ok(None),
                            }
                        }
                        (CachedColumn::Scalar(value), ColumnShape::Scalar(_)) => {
                            rebuilt.push(ResultColumn::Scalar(value.clone()))
                        }
                        _ => return Ok(None),
                    }
                }
                Ok(Some(ResultRow::Tuple(rebuilt)))
            }
            _ => Ok(None),
        }
    }

    fn rebuild_entity(
        &self,
        cached: &CachedEntity,
        result: &EntityResult,
    ) -> CacheResult<Option<Entity>> {
        let mut entity = match self.persister.get_cached(&cached.key)? {
            Some(entity) => entity,
            None => return Ok(None),
        };

        for join in &result.joins {
            let association = match cached.associations.get(&join.field) {
                Some(CachedAssociation::ToOne(None)) => Association::ToOne(None),
                Some(CachedAssociation::ToOne(Some(target))) => {
                    match self.rebuild_entity(target, &join.target)? {
                        Some(target) => Association::ToOne(Some(EntityRef::resolved(target))),
                        None => return Ok(None),
                    }
                }
                Some(CachedAssociation::ToMany { collection, items }) => {
                    match self.rebuild_collection(collection, items, &join.target)? {
                        Some(members) => Association::ToMany(Collection::loaded(members)),
                        None => return Ok(None),
                    }
                }
                None => return Ok(None),
            };
            entity.set_association(join.field.clone(), association);
        }

        Ok(Some(entity))
    }

    /// Members of a fetch-joined collection; the collection entry must still
    /// list exactly the cached members
    fn rebuild_collection(
        &self,
        key: &CollectionCacheKey,
        items: &[CachedEntity],
        result: &EntityResult,
    ) -> CacheResult<Option<Vec<EntityRef>>> {
        let region = self
            .registry
            .collection_region(key.owner_type(), key.association())?;

        let listed = region
            .get_or_miss(key)
            .and_then(CacheEntry::into_collection)
            .map(|entry| {
                entry.complete
                    && entry.members.len() == items.len()
                    && entry.members.iter().zip(items).all(|(m, i)| *m == i.key)
            })
            .unwrap_or(false);

        if !listed {
            self.logger.on_miss(region.name(), key);
            return Ok(None);
        }
        self.logger.on_hit(region.name(), key);

        let mut members = Vec::with_capacity(items.len());
        for item in items {
            match self.rebuild_entity(item, result)? {
                Some(member) => members.push(EntityRef::resolved(member)),
                None => return Ok(None),
            }
        }
        Ok(Some(members))
    }

    fn cache_row(
        &self,
        row: &ResultRow,
        shape: &ResultShape,
        overwrite: bool,
    ) -> CacheResult<Option<CachedRow>> {
        match (row, shape) {
            (ResultRow::Entity(entity), ResultShape::Entity(result)) => {
                Ok(self.cache_entity(entity, result, overwrite)?.map(CachedRow::Entity))
            }
            (ResultRow::Tuple(columns), ResultShape::Tuple(shapes))
                if columns.len() == shapes.len() =>
            {
                let mut cached = Vec::with_capacity(columns.len());
                for (column, column_shape) in columns.iter().zip(shapes) {
                    match (column, column_shape) {
                        (ResultColumn::Entity(entity), ColumnShape::Entity(result)) => {
                            match self.cache_entity(entity, result, overwrite)? {
                                Some(entity) => cached.push(CachedColumn::Entity(entity)),
                                None => return Ok(None),
                            }
                        }
                        (ResultColumn::Scalar(value), ColumnShape::Scalar(_)) => {
                            cached.push(CachedColumn::Scalar(value.clone()))
                        }
                        _ => return Ok(None),
                    }
                }
                Ok(Some(CachedRow::Tuple(cached)))
            }
            _ => Ok(None),
        }
    }

    fn cache_entity(
        &self,
        entity: &Entity,
        result: &EntityResult,
        overwrite: bool,
    ) -> CacheResult<Option<CachedEntity>> {
        if entity.entity_type() != result.entity_type {
            return Ok(None);
        }

        let mut cached = CachedEntity::new(entity.key().clone());

        // Children first
        for join in &result.joins {
            let association = match entity.association(&join.field) {
                Some(Association::ToOne(None)) => CachedAssociation::ToOne(None),
                Some(Association::ToOne(Some(EntityRef::Resolved(target)))) => {
                    match self.cache_entity(target, &join.target, overwrite)? {
                        Some(target) => CachedAssociation::ToOne(Some(Box::new(target))),
                        None => return Ok(None),
                    }
                }
                Some(Association::ToMany(Collection::Loaded {
                    items,
                    complete: true,
                })) => {
                    let mut members = Vec::with_capacity(items.len());
                    for item in items {
                        let member = match item {
                            EntityRef::Resolved(member) => member,
                            EntityRef::Unresolved(_) => return Ok(None),
                        };
                        match self.cache_entity(member, &join.target, overwrite)? {
                            Some(member) => members.push(member),
                            None => return Ok(None),
                        }
                    }

                    let keys = members.iter().map(|m| m.key.clone()).collect();
                    self.persister
                        .put_collection(entity.key(), &join.field, keys, overwrite)?;

                    CachedAssociation::ToMany {
                        collection: CollectionCacheKey::new(entity.key(), &join.field),
                        items: members,
                    }
                }
                _ => return Ok(None),
            };
            cached.associations.insert(join.field.clone(), association);
        }

        self.persister.put_entity(entity, overwrite)?;
        Ok(Some(cached))
    }
}
