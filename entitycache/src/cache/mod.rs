// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Second-level cache
//!
//! This module provides region-based caching for:
//! - Entities, keyed by type and identifier
//! - Association collections, keyed by owner and field
//! - Query results, keyed by query fingerprint
//!
//! [`CacheManager`] is the entry point. Everything below it absorbs backend
//! failures, so a broken cache only ever costs extra storage round trips.

pub mod cache_config;
pub mod cache_manager;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod logger;
pub mod persister;
pub mod query_cache;
pub mod region;
pub mod region_registry;
pub mod validator;

pub use cache_config::{CacheConfig, DEFAULT_QUERY_REGION};
pub use cache_manager::{CacheManager, CacheManagerBuilder, DataSource};
pub use entry::{CacheEntry, CollectionCacheEntry, EntityCacheEntry, QueryCacheEntry};
pub use invalidation::{InvalidationEvent, InvalidationManager, InvalidationResult};
pub use key::{CacheKey, CacheKeyKind, CollectionCacheKey, EntityCacheKey, QueryCacheKey};
pub use logger::{
    CacheLogger, CacheLoggerChain, LogCacheLogger, RegionStatistics, StatisticsCacheLogger,
};
pub use persister::CachedEntityPersister;
pub use query_cache::QueryCache;
pub use region::{DefaultRegion, Region, RegionExt};
pub use region_registry::RegionRegistry;
pub use validator::{QueryCacheValidator, TimestampQueryCacheValidator};

use serde::{Deserialize, Serialize};

/// How a cacheable query interacts with the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheMode {
    /// Read from the cache, write misses back
    #[default]
    Normal,
    /// Read from the cache, never write
    Get,
    /// Never read; always execute and write
    Put,
    /// Never read; always execute and overwrite existing entity entries
    Refresh,
}

impl CacheMode {
    pub fn reads(self) -> bool {
        matches!(self, CacheMode::Normal | CacheMode::Get)
    }

    pub fn writes(self) -> bool {
        !matches!(self, CacheMode::Get)
    }
}
