// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! EntityCache - A second-level cache for entity-oriented data access
//!
//! EntityCache sits between an application's object mapper and its relational
//! data source. It keeps entities, association collections and query results in
//! named regions so repeated reads skip storage.
//!
//! # Features
//!
//! - **Entity regions**: Entities cached by type and identifier, flattened to scalars
//! - **Collection regions**: To-many associations cached as ordered member keys
//! - **Query result cache**: Results stored as keys, rebuilt all-or-nothing
//! - **Cache modes**: NORMAL, GET, PUT and REFRESH per query
//! - **Bulk eviction**: Mutating statements can evict the regions they touch
//! - **Pluggable backends**: In-memory regions or Sled for persistent ones
//!
//! # Usage
//!
//! ```ignore
//! use entitycache::{CacheConfig, CacheManager, QueryCacheOptions};
//!
//! let cache = CacheManager::new(CacheConfig::in_memory(), data_source)?;
//! let rows = cache.execute_cacheable(&query, &QueryCacheOptions::new())?;
//! println!("hits: {}", cache.statistics().hit_count());
//! ```

pub mod cache;
pub mod datasource;
pub mod entity;
pub mod error;
pub mod metadata;
pub mod query;
pub mod storage;
pub mod value;

pub use cache::{
    CacheConfig, CacheLogger, CacheManager, CacheManagerBuilder, CacheMode, CollectionCacheKey,
    DataSource, EntityCacheKey, QueryCacheKey, Region, StatisticsCacheLogger,
};
pub use datasource::{EntityStore, Hydrator, QueryExecutor, RawRow};
pub use entity::{Association, Collection, Entity, EntityRef, ResultColumn, ResultRow};
pub use error::{CacheError, CacheResult, DataSourceError, DataSourceResult};
pub use metadata::{
    flatten_identifier, AssociationMetadata, CacheUsage, EntityMetadata, IdentifierValue,
    MetadataProvider, MetadataRegistry,
};
pub use query::{
    ColumnShape, EntityResult, Query, QueryCacheOptions, ResultShape, StatementKind,
};
pub use storage::StorageType;
pub use value::{identifier, IdentifierMap, Value};

/// EntityCache version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// EntityCache crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
