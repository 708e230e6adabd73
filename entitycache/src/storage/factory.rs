// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Storage driver factory

use super::traits::{StorageDriver, StorageTree};
use super::types::{StorageDriverError, StorageResult, StorageType};
use std::path::Path;

/// Object-safe driver handle shared by the region registry
pub type DynStorageDriver = dyn StorageDriver<Tree = Box<dyn StorageTree>>;

/// Create a storage driver based on configuration
///
/// # Arguments
/// * `storage_type` - The type of storage driver to create
/// * `path` - Directory for on-disk drivers; ignored by the memory driver
///
/// # Examples
/// ```ignore
/// let driver = create_storage_driver(StorageType::Sled, Some("./cache"))?;
/// let tree = driver.open_tree("query_cache_region")?;
/// ```
pub fn create_storage_driver<P: AsRef<Path>>(
    storage_type: StorageType,
    path: Option<P>,
) -> StorageResult<Box<DynStorageDriver>> {
    match storage_type {
        StorageType::Memory => {
            use super::memory::MemoryStorageDriver;
            Ok(Box::new(MemoryStorageDriver::new()) as Box<DynStorageDriver>)
        }
        #[cfg(feature = "sled-backend")]
        StorageType::Sled => {
            use super::sled::SledDriver;
            let path = path.ok_or_else(|| {
                StorageDriverError::InvalidConfiguration(
                    "sled storage requires a storage path".to_string(),
                )
            })?;
            let driver = SledDriver::open(path)?;
            Ok(Box::new(driver) as Box<DynStorageDriver>)
        }
        #[cfg(not(feature = "sled-backend"))]
        StorageType::Sled => {
            let _ = path;
            Err(StorageDriverError::InvalidConfiguration(
                "sled storage backend is not compiled in (enable feature 'sled-backend')"
                    .to_string(),
            ))
        }
    }
}
