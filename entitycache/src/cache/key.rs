// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache keys
//!
//! Keys identify what is cached: a single entity, one owner's association
//! collection, or the result of a query. Each key renders a stable string that
//! the region uses as its backend key.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CacheError, CacheResult};
use crate::value::{IdentifierMap, Value};

/// Which family of key (and therefore which kind of region) a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKeyKind {
    Entity,
    Collection,
    Query,
}

impl fmt::Display for CacheKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKeyKind::Entity => "entity",
            CacheKeyKind::Collection => "collection",
            CacheKeyKind::Query => "query",
        };
        write!(f, "{}", name)
    }
}

/// Generic cache key trait
pub trait CacheKey: fmt::Debug + Send + Sync {
    /// Deterministic representation used as the storage backend key
    fn region_key(&self) -> String;

    fn kind(&self) -> CacheKeyKind;
}

/// Identity of one cached entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityCacheKey {
    entity_type: String,
    identifier: IdentifierMap,
}

impl EntityCacheKey {
    /// Build a key, rejecting identities that are not fully known
    ///
    /// The identifier must be non-empty and contain no NULL values;
    /// association-valued identifiers must already be flattened.
    pub fn new(entity_type: impl Into<String>, identifier: IdentifierMap) -> CacheResult<Self> {
        let entity_type = entity_type.into();

        if identifier.is_empty() {
            return Err(CacheError::InvalidIdentifier {
                entity_type,
                reason: "identifier is empty".to_string(),
            });
        }

        if let Some((field, _)) = identifier.iter().find(|(_, v)| v.is_null()) {
            return Err(CacheError::InvalidIdentifier {
                reason: format!("identifier field '{}' is NULL", field),
                entity_type,
            });
        }

        Ok(Self {
            entity_type,
            identifier,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn identifier(&self) -> &IdentifierMap {
        &self.identifier
    }
}

impl CacheKey for EntityCacheKey {
    fn region_key(&self) -> String {
        format!(
            "{}{}",
            self.entity_type,
            render_identifier(&self.identifier)
        )
    }

    fn kind(&self) -> CacheKeyKind {
        CacheKeyKind::Entity
    }
}

impl fmt::Display for EntityCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.region_key())
    }
}

/// Identity of one owner's association collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionCacheKey {
    owner_type: String,
    association: String,
    owner_identifier: IdentifierMap,
}

impl CollectionCacheKey {
    pub fn new(owner: &EntityCacheKey, association: impl Into<String>) -> Self {
        Self {
            owner_type: owner.entity_type().to_string(),
            association: association.into(),
            owner_identifier: owner.identifier().clone(),
        }
    }

    pub fn owner_type(&self) -> &str {
        &self.owner_type
    }

    pub fn association(&self) -> &str {
        &self.association
    }

    pub fn owner_identifier(&self) -> &IdentifierMap {
        &self.owner_identifier
    }

    /// Key of the entity owning this collection
    pub fn owner_key(&self) -> EntityCacheKey {
        // Built from an already-validated EntityCacheKey
        EntityCacheKey {
            entity_type: self.owner_type.clone(),
            identifier: self.owner_identifier.clone(),
        }
    }
}

impl CacheKey for CollectionCacheKey {
    fn region_key(&self) -> String {
        format!(
            "{}.{}{}",
            self.owner_type,
            self.association,
            render_identifier(&self.owner_identifier)
        )
    }

    fn kind(&self) -> CacheKeyKind {
        CacheKeyKind::Collection
    }
}

/// Key of a cached query result
///
/// `hash` is the query fingerprint. The lifetime is carried on the key so the
/// reader can judge staleness; it does not participate in the backend key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryCacheKey {
    pub hash: String,
    pub lifetime: u64,
    pub region: String,
}

impl QueryCacheKey {
    pub fn new(hash: impl Into<String>, lifetime: u64, region: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            lifetime,
            region: region.into(),
        }
    }
}

impl CacheKey for QueryCacheKey {
    fn region_key(&self) -> String {
        self.hash.clone()
    }

    fn kind(&self) -> CacheKeyKind {
        CacheKeyKind::Query
    }
}

/// Render `[field=tag:value;...]` with the value type tagged and separators
/// escaped, so distinct identifiers never render the same string
fn render_identifier(identifier: &IdentifierMap) -> String {
    let parts: Vec<String> = identifier
        .iter()
        .map(|(field, value)| format!("{}={}", escape(field), render_value(value)))
        .collect();
    format!("[{}]", parts.join(";"))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "n:".to_string(),
        Value::Boolean(b) => format!("b:{}", b),
        Value::Integer(n) => format!("i:{}", n),
        Value::Float(n) => format!("f:{:016x}", n.to_bits()),
        Value::String(s) => format!("s:{}", escape(s)),
        Value::DateTime(dt) => format!(
            "d:{}.{:09}",
            dt.timestamp(),
            dt.timestamp_subsec_nanos()
        ),
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | ';' | '=' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
