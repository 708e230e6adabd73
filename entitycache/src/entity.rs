// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory entity graph handed out by the cache and the entity store
//!
//! Entities hold scalar field state plus associations. A to-one association is
//! either a resolved entity or an unresolved reference carrying only the target
//! key; a to-many association is a [`Collection`] that may not be loaded yet.
//! Back-references are always unresolved so the graph stays a tree of owned
//! values.

use std::collections::BTreeMap;

use crate::cache::key::EntityCacheKey;
use crate::error::CacheResult;
use crate::value::{IdentifierMap, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    key: EntityCacheKey,
    fields: BTreeMap<String, Value>,
    associations: BTreeMap<String, Association>,
}

impl Entity {
    /// Create an entity with a fully known identity
    pub fn new(entity_type: impl Into<String>, identifier: IdentifierMap) -> CacheResult<Self> {
        Ok(Self::from_key(EntityCacheKey::new(entity_type, identifier)?))
    }

    pub fn from_key(key: EntityCacheKey) -> Self {
        Self {
            key,
            fields: BTreeMap::new(),
            associations: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn with_to_one(mut self, name: impl Into<String>, target: Option<EntityRef>) -> Self {
        self.set_association(name, Association::ToOne(target));
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>, collection: Collection) -> Self {
        self.set_association(name, Association::ToMany(collection));
        self
    }

    pub fn entity_type(&self) -> &str {
        self.key.entity_type()
    }

    pub fn identifier(&self) -> &IdentifierMap {
        self.key.identifier()
    }

    pub fn key(&self) -> &EntityCacheKey {
        &self.key
    }

    /// Scalar field value; identifier fields are visible here as well
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.key
            .identifier()
            .get(name)
            .or_else(|| self.fields.get(name))
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.get(name)
    }

    pub fn associations(&self) -> &BTreeMap<String, Association> {
        &self.associations
    }

    pub fn set_association(&mut self, name: impl Into<String>, association: Association) {
        self.associations.insert(name.into(), association);
    }

    /// The to-one reference stored under `name`, if any
    pub fn to_one(&self, name: &str) -> Option<&EntityRef> {
        match self.associations.get(name) {
            Some(Association::ToOne(target)) => target.as_ref(),
            _ => None,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        match self.associations.get(name) {
            Some(Association::ToMany(collection)) => Some(collection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Association {
    ToOne(Option<EntityRef>),
    ToMany(Collection),
}

/// Reference to another entity
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRef {
    Resolved(Box<Entity>),
    /// Identity only; load through the cache to materialize
    Unresolved(EntityCacheKey),
}

impl EntityRef {
    pub fn resolved(entity: Entity) -> Self {
        EntityRef::Resolved(Box::new(entity))
    }

    pub fn key(&self) -> &EntityCacheKey {
        match self {
            EntityRef::Resolved(entity) => entity.key(),
            EntityRef::Unresolved(key) => key,
        }
    }

    pub fn as_resolved(&self) -> Option<&Entity> {
        match self {
            EntityRef::Resolved(entity) => Some(entity),
            EntityRef::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, EntityRef::Resolved(_))
    }
}

/// To-many association state
#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    /// Not loaded; members must be fetched on demand
    Uninitialized,
    /// Loaded members. `complete` is false for filtered or partially
    /// fetched collections, which are never cached.
    Loaded { items: Vec<EntityRef>, complete: bool },
}

impl Collection {
    /// A fully loaded collection
    pub fn loaded(items: Vec<EntityRef>) -> Self {
        Collection::Loaded {
            items,
            complete: true,
        }
    }

    pub fn partial(items: Vec<EntityRef>) -> Self {
        Collection::Loaded {
            items,
            complete: false,
        }
    }

    pub fn items(&self) -> &[EntityRef] {
        match self {
            Collection::Uninitialized => &[],
            Collection::Loaded { items, .. } => items,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, Collection::Loaded { .. })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Collection::Loaded { complete: true, .. })
    }
}

/// One row of a hydrated query result
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRow {
    Entity(Entity),
    Tuple(Vec<ResultColumn>),
}

impl ResultRow {
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            ResultRow::Entity(entity) => Some(entity),
            ResultRow::Tuple(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultColumn {
    Entity(Entity),
    Scalar(Value),
}
