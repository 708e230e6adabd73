// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache regions
//!
//! A region is a named keyed store of cache entries with an optional default
//! lifetime. Regions are fallible; the cache layers above go through
//! [`RegionExt`], which turns every backend failure into a logged miss or a
//! dropped write so a broken backend never fails a request.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::storage::{StorageDriverError, StorageResult, StorageTree};

pub trait Region: Send + Sync {
    fn name(&self) -> &str;

    fn contains(&self, key: &dyn CacheKey) -> StorageResult<bool>;

    fn get(&self, key: &dyn CacheKey) -> StorageResult<Option<CacheEntry>>;

    /// Fetch several entries; the result is aligned with `keys`
    fn get_multiple(&self, keys: &[&dyn CacheKey]) -> StorageResult<Vec<Option<CacheEntry>>> {
        keys.iter().map(|key| self.get(*key)).collect()
    }

    /// Store an entry. `lifetime` overrides the region default; neither means
    /// the entry never expires.
    fn put(
        &self,
        key: &dyn CacheKey,
        entry: &CacheEntry,
        lifetime: Option<Duration>,
    ) -> StorageResult<()>;

    fn evict(&self, key: &dyn CacheKey) -> StorageResult<()>;

    fn evict_all(&self) -> StorageResult<()>;
}

/// What actually lands in the backend for each key
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    /// Expiry as unix milliseconds
    expires_at: Option<i64>,
    checksum: u32,
    payload: Vec<u8>,
}

impl StoredEntry {
    fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at.is_some_and(|at| now_millis >= at)
    }
}

/// Region stored in a [`StorageTree`]
pub struct DefaultRegion {
    name: String,
    tree: Box<dyn StorageTree>,
    default_lifetime: Option<Duration>,
}

impl DefaultRegion {
    pub fn new(
        name: impl Into<String>,
        tree: Box<dyn StorageTree>,
        default_lifetime: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            tree,
            default_lifetime,
        }
    }

    pub fn default_lifetime(&self) -> Option<Duration> {
        self.default_lifetime
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> StorageResult<usize> {
        self.tree.len()
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        self.tree.is_empty()
    }

    fn load_envelope(&self, key: &[u8]) -> StorageResult<Option<StoredEntry>> {
        let bytes = self.tree.get(key)?;
        self.decode_envelope(key, bytes)
    }

    /// Decode the envelope stored under `key`, dropping it when it is expired
    /// or does not pass the checksum
    fn decode_envelope(
        &self,
        key: &[u8],
        bytes: Option<Vec<u8>>,
    ) -> StorageResult<Option<StoredEntry>> {
        let bytes = match bytes {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let envelope: StoredEntry = match bincode::deserialize(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Dropping undecodable entry in region '{}': {}", self.name, e);
                self.tree.remove(key)?;
                return Ok(None);
            }
        };

        if crc32fast::hash(&envelope.payload) != envelope.checksum {
            log::warn!("Dropping corrupt entry in region '{}'", self.name);
            self.tree.remove(key)?;
            return Ok(None);
        }

        if envelope.is_expired(Utc::now().timestamp_millis()) {
            self.tree.remove(key)?;
            return Ok(None);
        }

        Ok(Some(envelope))
    }

    fn decode_entry(&self, key: &[u8], bytes: Option<Vec<u8>>) -> StorageResult<Option<CacheEntry>> {
        let envelope = match self.decode_envelope(key, bytes)? {
            Some(envelope) => envelope,
            None => return Ok(None),
        };

        match bincode::deserialize::<CacheEntry>(&envelope.payload) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                log::warn!(
                    "Dropping entry with unreadable payload in region '{}': {}",
                    self.name,
                    e
                );
                self.tree.remove(key)?;
                Ok(None)
            }
        }
    }
}

impl Region for DefaultRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn contains(&self, key: &dyn CacheKey) -> StorageResult<bool> {
        Ok(self.load_envelope(key.region_key().as_bytes())?.is_some())
    }

    fn get(&self, key: &dyn CacheKey) -> StorageResult<Option<CacheEntry>> {
        let region_key = key.region_key();
        let bytes = self.tree.get(region_key.as_bytes())?;
        self.decode_entry(region_key.as_bytes(), bytes)
    }

    fn get_multiple(&self, keys: &[&dyn CacheKey]) -> StorageResult<Vec<Option<CacheEntry>>> {
        let region_keys: Vec<String> = keys.iter().map(|key| key.region_key()).collect();
        let raw_keys: Vec<&[u8]> = region_keys.iter().map(|key| key.as_bytes()).collect();
        let values = self.tree.batch_get(&raw_keys)?;

        raw_keys
            .into_iter()
            .zip(values)
            .map(|(key, bytes)| self.decode_entry(key, bytes))
            .collect()
    }

    fn put(
        &self,
        key: &dyn CacheKey,
        entry: &CacheEntry,
        lifetime: Option<Duration>,
    ) -> StorageResult<()> {
        let payload = bincode::serialize(entry)?;
        let expires_at = lifetime
            .or(self.default_lifetime)
            .filter(|d| !d.is_zero())
            .map(|d| Utc::now().timestamp_millis().saturating_add(d.as_millis() as i64));

        let envelope = StoredEntry {
            expires_at,
            checksum: crc32fast::hash(&payload),
            payload,
        };

        self.tree
            .insert(key.region_key().as_bytes(), &bincode::serialize(&envelope)?)
    }

    fn evict(&self, key: &dyn CacheKey) -> StorageResult<()> {
        self.tree.remove(key.region_key().as_bytes())
    }

    fn evict_all(&self) -> StorageResult<()> {
        self.tree.clear()
    }
}

/// Stand-in for a region whose backend could not be opened
///
/// Every operation fails, so reads degrade to misses and writes are dropped.
pub struct UnavailableRegion {
    name: String,
    reason: String,
}

impl UnavailableRegion {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    fn error(&self) -> StorageDriverError {
        StorageDriverError::BackendSpecific(format!(
            "region '{}' is unavailable: {}",
            self.name, self.reason
        ))
    }
}

impl Region for UnavailableRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn contains(&self, _key: &dyn CacheKey) -> StorageResult<bool> {
        Err(self.error())
    }

    fn get(&self, _key: &dyn CacheKey) -> StorageResult<Option<CacheEntry>> {
        Err(self.error())
    }

    fn put(
        &self,
        _key: &dyn CacheKey,
        _entry: &CacheEntry,
        _lifetime: Option<Duration>,
    ) -> StorageResult<()> {
        Err(self.error())
    }

    fn evict(&self, _key: &dyn CacheKey) -> StorageResult<()> {
        Err(self.error())
    }

    fn evict_all(&self) -> StorageResult<()> {
        Err(self.error())
    }
}

/// Infallible region access for the cache layers
pub trait RegionExt {
    /// Read an entry; failures read as absent
    fn get_or_miss(&self, key: &dyn CacheKey) -> Option<CacheEntry>;

    /// Read several entries aligned with `keys`; a failure reads as all absent
    fn get_multiple_or_miss(&self, keys: &[&dyn CacheKey]) -> Vec<Option<CacheEntry>>;

    fn contains_or_false(&self, key: &dyn CacheKey) -> bool;

    /// Store an entry, returning whether the write went through
    fn put_or_drop(&self, key: &dyn CacheKey, entry: CacheEntry, lifetime: Option<Duration>)
        -> bool;

    fn evict_quietly(&self, key: &dyn CacheKey);

    fn evict_all_quietly(&self);
}

impl<R: Region + ?Sized> RegionExt for R {
    fn get_or_miss(&self, key: &dyn CacheKey) -> Option<CacheEntry> {
        match self.get(key) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!(
                    "Cache read failed in region '{}' for {} key: {}",
                    self.name(),
                    key.kind(),
                    e
                );
                None
            }
        }
    }

    fn get_multiple_or_miss(&self, keys: &[&dyn CacheKey]) -> Vec<Option<CacheEntry>> {
        match self.get_multiple(keys) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "Cache batch read of {} keys failed in region '{}': {}",
                    keys.len(),
                    self.name(),
                    e
                );
                vec![None; keys.len()]
            }
        }
    }

    fn contains_or_false(&self, key: &dyn CacheKey) -> bool {
        match self.contains(key) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Cache probe failed in region '{}': {}", self.name(), e);
                false
            }
        }
    }

    fn put_or_drop(
        &self,
        key: &dyn CacheKey,
        entry: CacheEntry,
        lifetime: Option<Duration>,
    ) -> bool {
        match self.put(key, &entry, lifetime) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "Cache write dropped in region '{}' for {} key: {}",
                    self.name(),
                    key.kind(),
                    e
                );
                false
            }
        }
    }

    fn evict_quietly(&self, key: &dyn CacheKey) {
        if let Err(e) = self.evict(key) {
            log::warn!("Cache eviction failed in region '{}': {}", self.name(), e);
        }
    }

    fn evict_all_quietly(&self) {
        if let Err(e) = self.evict_all() {
            log::warn!("Region clear failed for '{}': {}", self.name(), e);
        }
    }
}
