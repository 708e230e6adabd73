// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache event logging and statistics
//!
//! The cache reports every hit, miss and put to a [`CacheLogger`]. The
//! statistics logger keeps counters per region; the log logger forwards events
//! to the `log` facade; a chain fans out to several loggers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::key::CacheKey;

/// Sink for cache events
pub trait CacheLogger: Send + Sync {
    fn on_hit(&self, region: &str, key: &dyn CacheKey);

    fn on_miss(&self, region: &str, key: &dyn CacheKey);

    fn on_put(&self, region: &str, key: &dyn CacheKey);
}

/// Counters of one region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStatistics {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
}

impl RegionStatistics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Hit/miss/put counters, per region and in total
#[derive(Debug, Default)]
pub struct StatisticsCacheLogger {
    regions: RwLock<BTreeMap<String, RegionStatistics>>,
}

impl StatisticsCacheLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, region: &str, update: impl FnOnce(&mut RegionStatistics)) {
        let mut regions = self.regions.write();
        match regions.get_mut(region) {
            Some(stats) => update(stats),
            None => {
                let mut stats = RegionStatistics::default();
                update(&mut stats);
                regions.insert(region.to_string(), stats);
            }
        }
    }

    pub fn region_statistics(&self, region: &str) -> RegionStatistics {
        self.regions.read().get(region).copied().unwrap_or_default()
    }

    pub fn region_hit_count(&self, region: &str) -> u64 {
        self.region_statistics(region).hits
    }

    pub fn region_miss_count(&self, region: &str) -> u64 {
        self.region_statistics(region).misses
    }

    pub fn region_put_count(&self, region: &str) -> u64 {
        self.region_statistics(region).puts
    }

    fn total(&self) -> RegionStatistics {
        self.regions
            .read()
            .values()
            .fold(RegionStatistics::default(), |acc, s| RegionStatistics {
                hits: acc.hits + s.hits,
                misses: acc.misses + s.misses,
                puts: acc.puts + s.puts,
            })
    }

    pub fn hit_count(&self) -> u64 {
        self.total().hits
    }

    pub fn miss_count(&self) -> u64 {
        self.total().misses
    }

    pub fn put_count(&self) -> u64 {
        self.total().puts
    }

    pub fn hit_rate(&self) -> f64 {
        self.total().hit_rate()
    }

    /// Snapshot of all region counters
    pub fn snapshot(&self) -> BTreeMap<String, RegionStatistics> {
        self.regions.read().clone()
    }

    pub fn clear_stats(&self) {
        self.regions.write().clear();
    }
}

impl CacheLogger for StatisticsCacheLogger {
    fn on_hit(&self, region: &str, _key: &dyn CacheKey) {
        self.record(region, |s| s.hits += 1);
    }

    fn on_miss(&self, region: &str, _key: &dyn CacheKey) {
        self.record(region, |s| s.misses += 1);
    }

    fn on_put(&self, region: &str, _key: &dyn CacheKey) {
        self.record(region, |s| s.puts += 1);
    }
}

/// Forwards cache events to the `log` facade at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCacheLogger;

impl CacheLogger for LogCacheLogger {
    fn on_hit(&self, region: &str, key: &dyn CacheKey) {
        log::debug!("cache hit [{}] {} {}", region, key.kind(), key.region_key());
    }

    fn on_miss(&self, region: &str, key: &dyn CacheKey) {
        log::debug!("cache miss [{}] {} {}", region, key.kind(), key.region_key());
    }

    fn on_put(&self, region: &str, key: &dyn CacheKey) {
        log::debug!("cache put [{}] {} {}", region, key.kind(), key.region_key());
    }
}

/// Fans each event out to every registered logger
#[derive(Default, Clone)]
pub struct CacheLoggerChain {
    loggers: Vec<Arc<dyn CacheLogger>>,
}

impl CacheLoggerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, logger: Arc<dyn CacheLogger>) {
        self.loggers.push(logger);
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl CacheLogger for CacheLoggerChain {
    fn on_hit(&self, region: &str, key: &dyn CacheKey) {
        for logger in &self.loggers {
            logger.on_hit(region, key);
        }
    }

    fn on_miss(&self, region: &str, key: &dyn CacheKey) {
        for logger in &self.loggers {
            logger.on_miss(region, key);
        }
    }

    fn on_put(&self, region: &str, key: &dyn CacheKey) {
        for logger in &self.loggers {
            logger.on_put(region, key);
        }
    }
}
