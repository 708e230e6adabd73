// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query cache entry validation

use chrono::Utc;

use super::entry::QueryCacheEntry;
use super::key::QueryCacheKey;

/// Decides whether a cached query result may still be served
pub trait QueryCacheValidator: Send + Sync {
    fn is_valid(&self, key: &QueryCacheKey, entry: &QueryCacheEntry) -> bool;
}

/// Lifetime check against the entry's creation time; a zero lifetime never
/// goes stale
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampQueryCacheValidator;

impl QueryCacheValidator for TimestampQueryCacheValidator {
    fn is_valid(&self, key: &QueryCacheKey, entry: &QueryCacheEntry) -> bool {
        if key.lifetime == 0 {
            return true;
        }

        let age_millis = Utc::now()
            .signed_duration_since(entry.created_at)
            .num_milliseconds();
        i128::from(age_millis) <= i128::from(key.lifetime) * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::query::{EntityResult, ResultShape};

    fn entry_created(seconds_ago: i64) -> QueryCacheEntry {
        let mut entry =
            QueryCacheEntry::new(Vec::new(), ResultShape::Entity(EntityResult::new("Country")));
        entry.created_at = Utc::now() - Duration::seconds(seconds_ago);
        entry
    }

    #[test]
    fn test_zero_lifetime_never_stale() {
        let key = QueryCacheKey::new("h", 0, "r");
        assert!(TimestampQueryCacheValidator.is_valid(&key, &entry_created(1_000_000)));
    }

    #[test]
    fn test_lifetime_window() {
        let key = QueryCacheKey::new("h", 3600, "r");
        assert!(TimestampQueryCacheValidator.is_valid(&key, &entry_created(10)));
        assert!(!TimestampQueryCacheValidator.is_valid(&key, &entry_created(3601 + 10)));
    }
}
