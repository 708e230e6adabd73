// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for the second-level cache
//!
//! Only configuration errors and collaborator failures ever reach callers.
//! Region backend failures are absorbed by the cache and surface as misses.

use thiserror::Error;

/// Failure reported by one of the external collaborators (query execution,
/// hydration, entity store). The cache never wraps or retries these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataSourceError {
    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Hydration failed: {0}")]
    Hydration(String),

    #[error("Entity store error: {0}")]
    Store(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Second-level cache query supports only select statements")]
    NonSelectStatement,

    #[error("Second level cache does not support partial entities")]
    PartialEntities,

    #[error("Invalid cache region name: '{0}'")]
    InvalidRegionName(String),

    #[error("Entity type is not cacheable: {0}")]
    NonCacheableEntity(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("Unknown association {entity_type}::{field}")]
    UnknownAssociation { entity_type: String, field: String },

    #[error("Cannot update a read-only entity: {0}")]
    ReadOnlyEntity(String),

    #[error("Invalid identifier for {entity_type}: {reason}")]
    InvalidIdentifier { entity_type: String, reason: String },

    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),
}

impl CacheError {
    /// True for errors raised before any cache or storage access
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, CacheError::DataSource(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::InvalidConfiguration(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

pub type DataSourceResult<T> = Result<T, DataSourceError>;
