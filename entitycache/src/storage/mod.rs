// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Region backing stores
//!
//! Trait-based abstractions over named key-value trees, so cache regions can be
//! kept in process memory or in an embedded on-disk store interchangeably.
//!
//! # Architecture
//!
//! ```text
//! Region (cache keys and entries)
//!     ↓
//! StorageTree (byte key-value abstraction)
//!     ↓
//! Concrete Implementations (Memory, Sled)
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! use crate::storage::{create_storage_driver, StorageType};
//!
//! let driver = create_storage_driver(StorageType::Memory, None)?;
//! let tree = driver.open_tree("query_cache_region")?;
//!
//! tree.insert(b"key", b"value")?;
//! let value = tree.get(b"key")?;
//! tree.remove(b"key")?;
//! ```

pub mod factory;
pub mod memory;
#[cfg(feature = "sled-backend")]
pub mod sled;
pub mod traits;
pub mod types;

pub use factory::{create_storage_driver, DynStorageDriver};
pub use memory::MemoryStorageDriver;
pub use traits::{StorageDriver, StorageTree};
pub use types::{StorageDriverError, StorageResult, StorageType};
