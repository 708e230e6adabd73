// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Entity mapping metadata
//!
//! Describes identifier fields, scalar fields, associations and cache settings
//! for each entity type. The cache never inspects entities reflectively; it
//! walks them through this metadata.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::cache::key::EntityCacheKey;
use crate::error::{CacheError, CacheResult};
use crate::value::{IdentifierMap, Value};

/// Concurrency strategy of a cached entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheUsage {
    /// Cached entities can never be updated
    ReadOnly,
    /// Updates evict the cached entry after the storage write
    NonStrictReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub usage: CacheUsage,
    /// Explicit entity region name; derived from the type name when absent
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationKind {
    ToOne,
    ToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationMetadata {
    pub field: String,
    pub target: String,
    pub kind: AssociationKind,
    /// Owning side holds the foreign key; only owning to-ones are flattened
    /// into the owner's cache entry
    pub owning_side: bool,
    pub mapped_by: Option<String>,
    pub inversed_by: Option<String>,
    /// Bulk eviction of the owner type also evicts the target type
    pub cascade_evict: bool,
}

impl AssociationMetadata {
    /// Owning to-one association (many-to-one or owning one-to-one)
    pub fn to_one(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            kind: AssociationKind::ToOne,
            owning_side: true,
            mapped_by: None,
            inversed_by: None,
            cascade_evict: false,
        }
    }

    /// Inverse to-many association mapped by `mapped_by` on the target
    pub fn to_many(
        field: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            kind: AssociationKind::ToMany,
            owning_side: false,
            mapped_by: Some(mapped_by.into()),
            inversed_by: None,
            cascade_evict: false,
        }
    }

    pub fn inversed_by(mut self, field: impl Into<String>) -> Self {
        self.inversed_by = Some(field.into());
        self
    }

    pub fn cascade_evict(mut self) -> Self {
        self.cascade_evict = true;
        self
    }

    pub fn is_owning_to_one(&self) -> bool {
        self.kind == AssociationKind::ToOne && self.owning_side
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub name: String,
    /// Identifier field names; an entry may name an association (derived
    /// identity)
    pub identifier: Vec<String>,
    /// Scalar field names, including scalar identifier fields
    pub fields: Vec<String>,
    pub associations: Vec<AssociationMetadata>,
    pub cache: Option<CacheSettings>,
}

impl EntityMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: Vec::new(),
            fields: Vec::new(),
            associations: Vec::new(),
            cache: None,
        }
    }

    /// Declare a scalar identifier field
    pub fn with_id(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.identifier.push(field.clone());
        self.fields.push(field);
        self
    }

    /// Declare an association as (part of) the identifier
    pub fn with_association_id(mut self, association: AssociationMetadata) -> Self {
        self.identifier.push(association.field.clone());
        self.associations.push(association);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn with_association(mut self, association: AssociationMetadata) -> Self {
        self.associations.push(association);
        self
    }

    pub fn cacheable(mut self, usage: CacheUsage) -> Self {
        self.cache = Some(CacheSettings {
            usage,
            region: None,
        });
        self
    }

    /// Explicit region; implies NONSTRICT_READ_WRITE when no usage was set
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        let usage = self
            .cache
            .as_ref()
            .map(|c| c.usage)
            .unwrap_or(CacheUsage::NonStrictReadWrite);
        self.cache = Some(CacheSettings {
            usage,
            region: Some(region.into()),
        });
        self
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        matches!(
            self.cache,
            Some(CacheSettings {
                usage: CacheUsage::ReadOnly,
                ..
            })
        )
    }

    pub fn association(&self, field: &str) -> Option<&AssociationMetadata> {
        self.associations.iter().find(|a| a.field == field)
    }

    pub fn is_identifier(&self, field: &str) -> bool {
        self.identifier.iter().any(|f| f == field)
    }

    /// Owning to-one associations, the ones stored in the entity entry
    pub fn owning_to_ones(&self) -> impl Iterator<Item = &AssociationMetadata> {
        self.associations.iter().filter(|a| a.is_owning_to_one())
    }

    pub fn to_many_associations(&self) -> impl Iterator<Item = &AssociationMetadata> {
        self.associations
            .iter()
            .filter(|a| a.kind == AssociationKind::ToMany)
    }
}

/// Source of entity metadata
pub trait MetadataProvider: Send + Sync {
    fn metadata_for(&self, entity_type: &str) -> Option<Arc<EntityMetadata>>;

    /// All known entity type names
    fn entity_types(&self) -> Vec<String>;

    /// Like [`metadata_for`](Self::metadata_for), failing for unknown types
    fn require(&self, entity_type: &str) -> CacheResult<Arc<EntityMetadata>> {
        self.metadata_for(entity_type)
            .ok_or_else(|| CacheError::UnknownEntity(entity_type.to_string()))
    }
}

/// In-memory metadata registry
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entities: RwLock<HashMap<String, Arc<EntityMetadata>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the metadata of an entity type
    pub fn register(&self, metadata: EntityMetadata) -> CacheResult<()> {
        if metadata.identifier.is_empty() {
            return Err(CacheError::InvalidConfiguration(format!(
                "entity type '{}' declares no identifier",
                metadata.name
            )));
        }

        log::debug!("Registered metadata for entity type '{}'", metadata.name);
        self.entities
            .write()
            .insert(metadata.name.clone(), Arc::new(metadata));
        Ok(())
    }
}

impl MetadataProvider for MetadataRegistry {
    fn metadata_for(&self, entity_type: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.read().get(entity_type).cloned()
    }

    fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.entities.read().keys().cloned().collect();
        types.sort();
        types
    }
}

/// Raw identifier component before flattening
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifierValue {
    Scalar(Value),
    /// Associated entity used as (part of) the identifier
    Entity(EntityCacheKey),
}

impl From<Value> for IdentifierValue {
    fn from(value: Value) -> Self {
        IdentifierValue::Scalar(value)
    }
}

impl From<EntityCacheKey> for IdentifierValue {
    fn from(key: EntityCacheKey) -> Self {
        IdentifierValue::Entity(key)
    }
}

/// Flatten an identifier so every component is a scalar
///
/// Association-valued components are replaced by the associated entity's
/// identifier value. A composite associated identifier is joined with a
/// single space, in field order.
pub fn flatten_identifier(
    metadata: &EntityMetadata,
    raw: BTreeMap<String, IdentifierValue>,
) -> CacheResult<IdentifierMap> {
    let invalid = |reason: String| CacheError::InvalidIdentifier {
        entity_type: metadata.name.clone(),
        reason,
    };

    let mut flat = IdentifierMap::new();

    for field in &metadata.identifier {
        let value = raw
            .get(field)
            .ok_or_else(|| invalid(format!("missing identifier field '{}'", field)))?;

        let scalar = match value {
            IdentifierValue::Scalar(v) => v.clone(),
            IdentifierValue::Entity(target) => {
                let association = metadata.association(field).ok_or_else(|| {
                    invalid(format!("identifier field '{}' is not an association", field))
                })?;
                if association.target != target.entity_type() {
                    return Err(invalid(format!(
                        "identifier field '{}' expects {} but got {}",
                        field,
                        association.target,
                        target.entity_type()
                    )));
                }
                join_identifier(target.identifier())
            }
        };

        if scalar.is_null() {
            return Err(invalid(format!("identifier field '{}' is NULL", field)));
        }
        flat.insert(field.clone(), scalar);
    }

    if let Some(extra) = raw.keys().find(|k| !metadata.is_identifier(k)) {
        return Err(invalid(format!("'{}' is not an identifier field", extra)));
    }

    Ok(flat)
}

fn join_identifier(identifier: &IdentifierMap) -> Value {
    if identifier.len() == 1 {
        if let Some(single) = identifier.values().next() {
            return single.clone();
        }
    }

    let parts: Vec<String> = identifier.values().map(|v| v.to_string()).collect();
    Value::String(parts.join(" "))
}
