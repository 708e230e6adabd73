// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Storage driver types and error handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage driver type configuration
///
/// Specifies which backing store holds the cache regions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StorageType {
    /// Memory - process-local maps, lost on restart
    /// Best for: request caches in a single process, testing
    #[default]
    Memory,

    /// Sled - Pure Rust embedded database
    /// Best for: caches that should survive restarts
    Sled,
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageType::Memory),
            "sled" => Ok(StorageType::Sled),
            _ => Err(format!(
                "Unknown storage type: {}. Valid options: memory, sled",
                s
            )),
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageType::Memory => "memory",
            StorageType::Sled => "sled",
        };
        write!(f, "{}", name)
    }
}

/// Error type for storage driver operations
#[derive(Error, Debug)]
pub enum StorageDriverError {
    /// I/O related errors (file system, network, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Backend is configured incorrectly (missing path, disabled feature)
    #[error("Invalid storage configuration: {0}")]
    InvalidConfiguration(String),

    /// Driver-specific error (Sled, external stores)
    #[error("Storage driver error: {0}")]
    BackendSpecific(String),
}

impl From<bincode::Error> for StorageDriverError {
    fn from(e: bincode::Error) -> Self {
        StorageDriverError::SerializationError(e.to_string())
    }
}

/// Result type for storage driver operations
pub type StorageResult<T> = Result<T, StorageDriverError>;
