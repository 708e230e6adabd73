//! Storage driver simulating an unreachable cache backend

use entitycache::storage::{
    StorageDriver, StorageDriverError, StorageResult, StorageTree, StorageType,
};
use std::path::Path;

fn outage() -> StorageDriverError {
    StorageDriverError::BackendSpecific("cache backend unreachable".to_string())
}

/// Opens trees fine, but every tree operation fails
#[derive(Default)]
pub struct BrokenStorageDriver {
    /// Fail already when opening a tree
    pub fail_open: bool,
}

pub struct BrokenTree;

impl StorageTree for BrokenTree {
    fn insert(&self, _key: &[u8], _value: &[u8]) -> StorageResult<()> {
        Err(outage())
    }

    fn get(&self, _key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Err(outage())
    }

    fn remove(&self, _key: &[u8]) -> StorageResult<()> {
        Err(outage())
    }

    fn contains_key(&self, _key: &[u8]) -> StorageResult<bool> {
        Err(outage())
    }

    fn clear(&self) -> StorageResult<()> {
        Err(outage())
    }

    fn len(&self) -> StorageResult<usize> {
        Err(outage())
    }

    fn flush(&self) -> StorageResult<()> {
        Err(outage())
    }
}

impl StorageDriver for BrokenStorageDriver {
    type Tree = Box<dyn StorageTree>;

    fn open<P: AsRef<Path>>(_path: P) -> StorageResult<Self> {
        Ok(Self::default())
    }

    fn open_tree(&self, _name: &str) -> StorageResult<Self::Tree> {
        if self.fail_open {
            return Err(outage());
        }
        Ok(Box::new(BrokenTree))
    }

    fn list_trees(&self) -> StorageResult<Vec<String>> {
        Err(outage())
    }

    fn flush(&self) -> StorageResult<()> {
        Err(outage())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }
}
