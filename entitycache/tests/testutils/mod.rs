//! Test utilities for EntityCache integration tests
//!
//! - TestFixture: cache manager over an in-memory relational data source
//! - BrokenStorageDriver: backend whose every operation fails

#![allow(dead_code)]

pub mod broken_storage;
pub mod test_fixture;
