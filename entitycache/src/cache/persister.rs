// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache-aware entity persister
//!
//! Sits between callers and the [`EntityStore`]. Reads consult the entity (or
//! collection) region first and fall back to storage on a miss; writes go to
//! storage first and evict the affected entries afterwards. Entity entries are
//! flat: scalar fields plus owning to-one references by identifier.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::entry::{CacheEntry, CachedValue, CollectionCacheEntry, EntityCacheEntry};
use super::key::{CacheKey, CollectionCacheKey, EntityCacheKey};
use super::logger::CacheLogger;
use super::region::{Region, RegionExt};
use super::region_registry::RegionRegistry;
use crate::datasource::EntityStore;
use crate::entity::{Association, Collection, Entity, EntityRef};
use crate::error::{CacheError, CacheResult};
use crate::metadata::{AssociationKind, AssociationMetadata, EntityMetadata, MetadataProvider};
use crate::value::{IdentifierMap, Value};

pub struct CachedEntityPersister {
    registry: Arc<RegionRegistry>,
    metadata: Arc<dyn MetadataProvider>,
    store: Arc<dyn EntityStore>,
    logger: Arc<dyn CacheLogger>,
}

impl CachedEntityPersister {
    pub fn new(
        registry: Arc<RegionRegistry>,
        metadata: Arc<dyn MetadataProvider>,
        store: Arc<dyn EntityStore>,
        logger: Arc<dyn CacheLogger>,
    ) -> Self {
        Self {
            registry,
            metadata,
            store,
            logger,
        }
    }

    /// Load an entity by identifier, from its region when possible
    pub fn load_by_id(
        &self,
        entity_type: &str,
        identifier: &IdentifierMap,
    ) -> CacheResult<Option<Entity>> {
        let metadata = self.metadata.require(entity_type)?;
        let key = EntityCacheKey::new(entity_type, identifier.clone())?;

        if !metadata.is_cacheable() {
            return Ok(self.store.load(entity_type, identifier)?);
        }

        if let Some(entity) = self.get_cached(&key)? {
            return Ok(Some(entity));
        }

        let loaded = self.store.load(entity_type, identifier)?;
        if let Some(entity) = &loaded {
            self.cache_loaded(&metadata, entity)?;
        }
        Ok(loaded)
    }

    /// Members of a to-many association, from the collection region when
    /// possible
    pub fn load_collection(
        &self,
        owner: &EntityCacheKey,
        association: &str,
    ) -> CacheResult<Vec<Entity>> {
        let metadata = self.metadata.require(owner.entity_type())?;
        let mapping = to_many_mapping(&metadata, association)?;
        let target = self.metadata.require(&mapping.target)?;
        let cacheable = metadata.is_cacheable() && target.is_cacheable();

        if cacheable {
            let region = self
                .registry
                .collection_region(owner.entity_type(), association)?;
            let key = CollectionCacheKey::new(owner, association);

            let cached = region
                .get_or_miss(&key)
                .and_then(CacheEntry::into_collection)
                .filter(|entry| entry.complete);
            if let Some(entry) = cached {
                if let Some(members) = self.get_cached_members(&target, &entry.members)? {
                    self.logger.on_hit(region.name(), &key);
                    return Ok(members);
                }
                log::debug!(
                    "Collection {} has evicted members; reloading from storage",
                    key.region_key()
                );
            }
            self.logger.on_miss(region.name(), &key);
        }

        let members = self.store.load_collection(owner, association)?;

        if cacheable {
            let mut keys = Vec::with_capacity(members.len());
            for member in &members {
                self.put_entity(member, false)?;
                keys.push(member.key().clone());
            }
            self.put_collection(owner, association, keys, true)?;
        }

        Ok(members)
    }

    /// Materialize a reference, loading unresolved ones through the cache
    pub fn resolve(&self, reference: &EntityRef) -> CacheResult<Option<Entity>> {
        match reference {
            EntityRef::Resolved(entity) => Ok(Some(entity.as_ref().clone())),
            EntityRef::Unresolved(key) => self.load_by_id(key.entity_type(), key.identifier()),
        }
    }

    /// Write through to storage, then evict the entity and the inverse
    /// collections that may list it
    pub fn update(&self, entity: &Entity) -> CacheResult<()> {
        let metadata = self.metadata.require(entity.entity_type())?;
        if metadata.is_read_only() {
            return Err(CacheError::ReadOnlyEntity(entity.entity_type().to_string()));
        }

        self.store.update(entity)?;
        if metadata.is_cacheable() {
            self.evict_after_write(&metadata, entity)?;
        }
        Ok(())
    }

    pub fn delete(&self, entity: &Entity) -> CacheResult<()> {
        let metadata = self.metadata.require(entity.entity_type())?;

        self.store.delete(entity)?;
        if metadata.is_cacheable() {
            self.evict_after_write(&metadata, entity)?;
            for association in metadata.to_many_associations() {
                let region = self
                    .registry
                    .collection_region(&metadata.name, &association.field)?;
                region.evict_quietly(&CollectionCacheKey::new(entity.key(), &association.field));
            }
        }
        Ok(())
    }

    /// Read an entity from its region only; never touches storage
    ///
    /// Logs a hit or a miss. An entry that no longer matches the entity's
    /// metadata is evicted and reported as a miss.
    pub fn get_cached(&self, key: &EntityCacheKey) -> CacheResult<Option<Entity>> {
        let metadata = self.metadata.require(key.entity_type())?;
        let region = self.registry.entity_region(key.entity_type())?;
        let entry = region.get_or_miss(key);
        Ok(self.accept_entry(&metadata, region.as_ref(), key, entry))
    }

    /// Read every member of a collection with one region round trip; `None`
    /// as soon as one member is missing
    fn get_cached_members(
        &self,
        target: &EntityMetadata,
        keys: &[EntityCacheKey],
    ) -> CacheResult<Option<Vec<Entity>>> {
        let region = self.registry.entity_region(&target.name)?;
        let lookup: Vec<&dyn CacheKey> = keys.iter().map(|k| k as &dyn CacheKey).collect();
        let entries = region.get_multiple_or_miss(&lookup);

        let mut members = Vec::with_capacity(keys.len());
        for (key, entry) in keys.iter().zip(entries) {
            match self.accept_entry(target, region.as_ref(), key, entry) {
                Some(entity) => members.push(entity),
                None => return Ok(None),
            }
        }
        Ok(Some(members))
    }

    /// Turn a region read into an entity, logging the hit or miss
    fn accept_entry(
        &self,
        metadata: &EntityMetadata,
        region: &dyn Region,
        key: &EntityCacheKey,
        entry: Option<CacheEntry>,
    ) -> Option<Entity> {
        let entry = match entry.and_then(CacheEntry::into_entity) {
            Some(entry) => entry,
            None => {
                self.logger.on_miss(region.name(), key);
                return None;
            }
        };

        match self.hydrate(metadata, key, &entry) {
            Some(entity) => {
                self.logger.on_hit(region.name(), key);
                Some(entity)
            }
            None => {
                log::warn!(
                    "Evicting entry {} that does not match the {} mapping",
                    key.region_key(),
                    metadata.name
                );
                region.evict_quietly(key);
                self.logger.on_miss(region.name(), key);
                None
            }
        }
    }

    pub fn contains(&self, key: &EntityCacheKey) -> CacheResult<bool> {
        let region = self.registry.entity_region(key.entity_type())?;
        Ok(region.contains_or_false(key))
    }

    /// Store an entity entry. Without `overwrite` an existing entry is kept.
    /// Returns whether an entry was written.
    pub fn put_entity(&self, entity: &Entity, overwrite: bool) -> CacheResult<bool> {
        let metadata = self.metadata.require(entity.entity_type())?;
        if !metadata.is_cacheable() {
            return Ok(false);
        }

        let region = self.registry.entity_region(entity.entity_type())?;
        let key = entity.key();
        if !overwrite && region.contains_or_false(key) {
            return Ok(false);
        }

        let entry = self.build_entry(&metadata, entity);
        let written = region.put_or_drop(key, entry.into(), None);
        if written {
            self.logger.on_put(region.name(), key);
        }
        Ok(written)
    }

    /// Store a collection entry. Without `overwrite` an identical existing
    /// entry is kept.
    pub fn put_collection(
        &self,
        owner: &EntityCacheKey,
        association: &str,
        members: Vec<EntityCacheKey>,
        overwrite: bool,
    ) -> CacheResult<bool> {
        let region = self
            .registry
            .collection_region(owner.entity_type(), association)?;
        let key = CollectionCacheKey::new(owner, association);
        let entry = CollectionCacheEntry::complete(members);

        if !overwrite {
            if let Some(CacheEntry::Collection(existing)) = region.get_or_miss(&key) {
                if existing == entry {
                    return Ok(false);
                }
            }
        }

        let written = region.put_or_drop(&key, entry.into(), None);
        if written {
            self.logger.on_put(region.name(), &key);
        }
        Ok(written)
    }

    /// Cache an entity just loaded from storage, plus its fully loaded
    /// collections
    fn cache_loaded(&self, metadata: &EntityMetadata, entity: &Entity) -> CacheResult<()> {
        self.put_entity(entity, true)?;

        for association in metadata.to_many_associations() {
            let items = match entity.collection(&association.field) {
                Some(Collection::Loaded {
                    items,
                    complete: true,
                }) => items,
                _ => continue,
            };

            let target = self.metadata.require(&association.target)?;
            if !target.is_cacheable() {
                continue;
            }

            let resolved: Vec<&Entity> = items.iter().filter_map(EntityRef::as_resolved).collect();
            if resolved.len() != items.len() {
                continue;
            }

            for member in &resolved {
                self.put_entity(member, false)?;
            }
            let keys = resolved.iter().map(|e| e.key().clone()).collect();
            self.put_collection(entity.key(), &association.field, keys, true)?;
        }
        Ok(())
    }

    fn build_entry(&self, metadata: &EntityMetadata, entity: &Entity) -> EntityCacheEntry {
        let mut entry = EntityCacheEntry::new(&metadata.name);

        for field in &metadata.fields {
            let value = entity.field(field).cloned().unwrap_or(Value::Null);
            entry.data.insert(field.clone(), CachedValue::Scalar(value));
        }

        for association in metadata.owning_to_ones() {
            let reference = match entity.to_one(&association.field) {
                Some(target) => Some(target.key().identifier().clone()),
                None if metadata.is_identifier(&association.field) => {
                    self.identifier_reference(association, entity)
                }
                None => None,
            };
            entry
                .data
                .insert(association.field.clone(), CachedValue::Reference(reference));
        }

        entry
    }

    /// Target identifier of an association-valued identifier component,
    /// recovered from the owner's flattened identifier
    fn identifier_reference(
        &self,
        association: &AssociationMetadata,
        entity: &Entity,
    ) -> Option<IdentifierMap> {
        let target = self.metadata.metadata_for(&association.target)?;
        let value = entity.identifier().get(&association.field)?;
        match target.identifier.as_slice() {
            [single] => Some(IdentifierMap::from([(single.clone(), value.clone())])),
            _ => None,
        }
    }

    /// Rebuild an entity shell from its entry; `None` when the entry does
    /// not fit the current mapping
    fn hydrate(
        &self,
        metadata: &EntityMetadata,
        key: &EntityCacheKey,
        entry: &EntityCacheEntry,
    ) -> Option<Entity> {
        if entry.entity_type != metadata.name {
            return None;
        }

        let expected: BTreeSet<&str> = metadata
            .fields
            .iter()
            .map(String::as_str)
            .chain(metadata.owning_to_ones().map(|a| a.field.as_str()))
            .collect();
        let stored: BTreeSet<&str> = entry.data.keys().map(String::as_str).collect();
        if expected != stored {
            return None;
        }

        let mut entity = Entity::from_key(key.clone());

        for (field, value) in &entry.data {
            match value {
                CachedValue::Scalar(value) => {
                    if !metadata.is_identifier(field) {
                        entity.set_field(field.clone(), value.clone());
                    }
                }
                CachedValue::Reference(reference) => {
                    let association = metadata.association(field)?;
                    let target = match reference {
                        Some(identifier) => Some(EntityRef::Unresolved(
                            EntityCacheKey::new(&association.target, identifier.clone()).ok()?,
                        )),
                        None => None,
                    };
                    entity.set_association(field.clone(), Association::ToOne(target));
                }
            }
        }

        for association in metadata.to_many_associations() {
            entity.set_association(
                association.field.clone(),
                Association::ToMany(Collection::Uninitialized),
            );
        }

        Some(entity)
    }

    /// Evict an entity's own entry and the inverse collections referencing it
    /// through owning to-ones, old and new targets alike
    fn evict_after_write(&self, metadata: &EntityMetadata, entity: &Entity) -> CacheResult<()> {
        let region = self.registry.entity_region(&metadata.name)?;
        let previous = region
            .get_or_miss(entity.key())
            .and_then(CacheEntry::into_entity);
        region.evict_quietly(entity.key());

        for association in metadata.owning_to_ones() {
            let inverse = match &association.inversed_by {
                Some(inverse) => inverse,
                None => continue,
            };

            let mut owners: Vec<EntityCacheKey> = Vec::new();
            if let Some(target) = entity.to_one(&association.field) {
                owners.push(target.key().clone());
            }
            if let Some(CachedValue::Reference(Some(identifier))) = previous
                .as_ref()
                .and_then(|entry| entry.data.get(&association.field))
            {
                if let Ok(key) = EntityCacheKey::new(&association.target, identifier.clone()) {
                    owners.push(key);
                }
            }

            let collections = self
                .registry
                .collection_region(&association.target, inverse)?;
            for owner in owners {
                collections.evict_quietly(&CollectionCacheKey::new(&owner, inverse));
            }
        }
        Ok(())
    }
}

fn to_many_mapping<'a>(
    metadata: &'a EntityMetadata,
    association: &str,
) -> CacheResult<&'a AssociationMetadata> {
    metadata
        .association(association)
        .filter(|a| a.kind == AssociationKind::ToMany)
        .ok_or_else(|| CacheError::UnknownAssociation {
            entity_type: metadata.name.clone(),
            field: association.to_string(),
        })
}
