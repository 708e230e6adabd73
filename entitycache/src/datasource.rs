// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Collaborator interfaces for the underlying data source
//!
//! The cache sits in front of these. Their errors are passed through to the
//! caller unchanged.

use std::collections::BTreeMap;

use crate::cache::key::EntityCacheKey;
use crate::entity::{Entity, ResultRow};
use crate::error::DataSourceResult;
use crate::query::{Query, ResultShape};
use crate::value::{IdentifierMap, Value};

/// One raw row from the data source, keyed by column alias
pub type RawRow = BTreeMap<String, Value>;

/// Executes queries and statements against storage
pub trait QueryExecutor: Send + Sync {
    fn execute_query(&self, query: &Query) -> DataSourceResult<Vec<RawRow>>;

    /// Run a mutating statement, returning the affected row count
    fn execute_statement(&self, statement: &Query) -> DataSourceResult<u64>;
}

/// Turns raw rows into entities according to the result shape
pub trait Hydrator: Send + Sync {
    fn hydrate(&self, rows: Vec<RawRow>, shape: &ResultShape) -> DataSourceResult<Vec<ResultRow>>;
}

/// Authoritative entity storage
pub trait EntityStore: Send + Sync {
    fn load(&self, entity_type: &str, identifier: &IdentifierMap)
        -> DataSourceResult<Option<Entity>>;

    /// Members of `owner`'s to-many association `association`, in order
    fn load_collection(
        &self,
        owner: &EntityCacheKey,
        association: &str,
    ) -> DataSourceResult<Vec<Entity>>;

    fn update(&self, entity: &Entity) -> DataSourceResult<()>;

    fn delete(&self, entity: &Entity) -> DataSourceResult<()>;
}
