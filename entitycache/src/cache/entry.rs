// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache entries
//!
//! Entries are flat, serializable snapshots. An entity entry stores scalar
//! field values and references to owning to-one targets by identifier; it never
//! embeds other entities. A query entry stores row structure as keys only and
//! is reconstructed from the entity and collection regions on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::key::{CollectionCacheKey, EntityCacheKey};
use crate::query::ResultShape;
use crate::value::{IdentifierMap, Value};

/// One stored field of an entity entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedValue {
    Scalar(Value),
    /// Owning to-one association, by target identifier
    Reference(Option<IdentifierMap>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCacheEntry {
    pub entity_type: String,
    pub data: BTreeMap<String, CachedValue>,
}

impl EntityCacheEntry {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            data: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCacheEntry {
    /// Member keys in collection order
    pub members: Vec<EntityCacheKey>,
    /// Whether `members` lists the whole collection; readers treat a partial
    /// entry as a miss
    pub complete: bool,
}

impl CollectionCacheEntry {
    pub fn complete(members: Vec<EntityCacheKey>) -> Self {
        Self {
            members,
            complete: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCacheEntry {
    pub rows: Vec<CachedRow>,
    /// Shape the rows were cached with; a reader asking for a different shape
    /// treats the entry as a miss
    pub shape: ResultShape,
    pub created_at: DateTime<Utc>,
}

impl QueryCacheEntry {
    pub fn new(rows: Vec<CachedRow>, shape: ResultShape) -> Self {
        Self {
            rows,
            shape,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedRow {
    Entity(CachedEntity),
    Tuple(Vec<CachedColumn>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedColumn {
    Entity(CachedEntity),
    Scalar(Value),
}

/// An entity inside a cached query row, plus its fetch-joined associations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub key: EntityCacheKey,
    pub associations: BTreeMap<String, CachedAssociation>,
}

impl CachedEntity {
    pub fn new(key: EntityCacheKey) -> Self {
        Self {
            key,
            associations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedAssociation {
    ToOne(Option<Box<CachedEntity>>),
    ToMany {
        collection: CollectionCacheKey,
        items: Vec<CachedEntity>,
    },
}

/// Anything a region can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEntry {
    Entity(EntityCacheEntry),
    Collection(CollectionCacheEntry),
    Query(QueryCacheEntry),
}

impl CacheEntry {
    pub fn into_entity(self) -> Option<EntityCacheEntry> {
        match self {
            CacheEntry::Entity(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn into_collection(self) -> Option<CollectionCacheEntry> {
        match self {
            CacheEntry::Collection(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn into_query(self) -> Option<QueryCacheEntry> {
        match self {
            CacheEntry::Query(entry) => Some(entry),
            _ => None,
        }
    }
}

impl From<EntityCacheEntry> for CacheEntry {
    fn from(entry: EntityCacheEntry) -> Self {
        CacheEntry::Entity(entry)
    }
}

impl From<CollectionCacheEntry> for CacheEntry {
    fn from(entry: CollectionCacheEntry) -> Self {
        CacheEntry::Collection(entry)
    }
}

impl From<QueryCacheEntry> for CacheEntry {
    fn from(entry: QueryCacheEntry) -> Self {
        CacheEntry::Query(entry)
    }
}
