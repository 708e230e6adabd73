//! Tests for region backends
//!
//! Covers degraded operation over a failing backend, persistence across
//! cache managers, shared in-memory drivers and region lifetimes.

#[path = "testutils/mod.rs"]
mod testutils;

use entitycache::storage::{DynStorageDriver, MemoryStorageDriver};
use entitycache::{CacheConfig, CacheError, Query, QueryCacheOptions, Region, StorageType};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use testutils::broken_storage::BrokenStorageDriver;
use testutils::test_fixture::{id, names, TestFixture, COUNTRY_REGION, QUERY_REGION};

fn broken(fail_open: bool) -> Arc<DynStorageDriver> {
    Arc::new(BrokenStorageDriver { fail_open })
}

fn assert_degrades_to_storage(fixture: &TestFixture) {
    fixture.load_cities();
    let options = QueryCacheOptions::new();

    for run in 1..=2 {
        let rows = fixture
            .cache
            .execute_cacheable(&TestFixture::states_with_cities_query(), &options)
            .unwrap();
        assert_eq!(names(&rows), vec!["Bavaria", "Brittany"]);
        assert_eq!(fixture.db.query_count(), run);
    }

    let germany = fixture.cache.load_entity("Country", &id(1)).unwrap();
    assert!(germany.is_some());
    fixture.cache.load_entity("Country", &id(1)).unwrap();
    assert_eq!(fixture.db.load_count(), 2);

    let stats = fixture.stats();
    assert_eq!(stats.put_count(), 0);
    assert_eq!(stats.hit_count(), 0);
    assert_eq!(stats.region_miss_count(QUERY_REGION), 2);

    assert!(!fixture.cache.contains_entity("Country", &id(1)).unwrap());
    fixture.cache.evict_entity("Country", &id(1)).unwrap();
    fixture.cache.evict_all_regions().unwrap();
    fixture.cache.flush();
}

#[test]
fn test_failing_backend_degrades_to_storage() {
    let fixture = TestFixture::with_driver(CacheConfig::in_memory(), broken(false));
    assert_degrades_to_storage(&fixture);
}

#[test]
fn test_unopenable_backend_degrades_to_storage() {
    let fixture = TestFixture::with_driver(CacheConfig::in_memory(), broken(true));
    assert_degrades_to_storage(&fixture);
}

#[test]
fn test_failing_backend_still_validates() {
    let fixture = TestFixture::with_driver(CacheConfig::in_memory(), broken(true));
    let query = TestFixture::countries_query().with_partial_entities();

    assert!(matches!(
        fixture.cache.execute_cacheable(&query, &QueryCacheOptions::new()),
        Err(CacheError::PartialEntities)
    ));
}

#[test]
fn test_shared_memory_driver() {
    let driver: Arc<DynStorageDriver> = Arc::new(MemoryStorageDriver::new());
    let first = TestFixture::with_driver(CacheConfig::in_memory(), driver.clone());
    let second = TestFixture::with_driver(CacheConfig::in_memory(), driver);
    first.load_countries();
    second.load_countries();

    first.cache.load_entity("Country", &id(1)).unwrap();

    // The second manager reads what the first one wrote
    let germany = second.cache.load_entity("Country", &id(1)).unwrap().unwrap();
    assert_eq!(germany.field("name").and_then(|v| v.as_string()), Some("Germany"));
    assert_eq!(second.db.load_count(), 0);
    assert_eq!(second.stats().region_hit_count(COUNTRY_REGION), 1);
}

#[test]
#[cfg(feature = "sled-backend")]
fn test_persistent_regions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::persistent(dir.path());
    assert_eq!(config.storage_type, StorageType::Sled);

    let mut fixture = TestFixture::with_config(config.clone());
    fixture.load_cities();
    let query = TestFixture::cities_with_state_query();
    let options = QueryCacheOptions::new();

    let first = fixture.cache.execute_cacheable(&query, &options).unwrap();
    fixture.cache.flush();

    fixture.restart(config);
    let second = fixture.cache.execute_cacheable(&query, &options).unwrap();

    assert_eq!(second, first);
    assert_eq!(fixture.db.query_count(), 1);
    assert_eq!(fixture.stats().region_hit_count(QUERY_REGION), 1);
}

#[test]
#[cfg(feature = "sled-backend")]
fn test_evict_all_reaches_regions_of_earlier_runs() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::persistent(dir.path());
    let options = QueryCacheOptions::new().with_region("archive_region");

    let mut fixture = TestFixture::with_config(config.clone());
    fixture.load_countries();
    fixture
        .cache
        .execute_cacheable(&TestFixture::countries_query(), &options)
        .unwrap();
    fixture.cache.flush();

    fixture.restart(config);
    fixture.cache.evict_all_regions().unwrap();

    fixture
        .cache
        .execute_cacheable(&TestFixture::countries_query(), &options)
        .unwrap();
    assert_eq!(fixture.db.query_count(), 2);
    assert_eq!(fixture.stats().region_miss_count("archive_region"), 1);
}

#[test]
#[cfg(feature = "sled-backend")]
fn test_bulk_eviction_reaches_query_regions_of_earlier_runs() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::persistent(dir.path());
    let options = QueryCacheOptions::new().with_region("archive_region");
    let germany = TestFixture::countries_query().with_parameter("name", "Germany");

    let mut fixture = TestFixture::with_config(config.clone());
    fixture.load_countries();
    let rows = fixture.cache.execute_cacheable(&germany, &options).unwrap();
    assert_eq!(names(&rows), vec!["Germany"]);
    fixture.cache.flush();

    // The new manager never opens archive_region before the statement runs
    fixture.restart(config);
    let rename = Query::update("UPDATE Country c SET c.name = :name WHERE c.id = :id", "Country")
        .with_parameter("id", 1)
        .with_parameter("name", "France")
        .mark_evict_on_success();
    assert_eq!(fixture.cache.execute_statement(&rename).unwrap(), 1);
    assert!(!fixture.cache.contains_query(&germany, &options).unwrap());

    // Recache the renamed entity; the old result must not be rebuilt from it
    fixture.cache.load_entity("Country", &id(1)).unwrap();
    let rows = fixture.cache.execute_cacheable(&germany, &options).unwrap();
    assert!(rows.is_empty());
    assert_eq!(fixture.db.query_count(), 2);
}

#[test]
fn test_region_lifetime_expires_entities() {
    let config =
        CacheConfig::in_memory().with_region_lifetime(COUNTRY_REGION, Duration::from_millis(50));
    let fixture = TestFixture::with_config(config);
    fixture.load_countries();

    fixture.cache.load_entity("Country", &id(1)).unwrap();
    assert!(fixture.cache.contains_entity("Country", &id(1)).unwrap());

    std::thread::sleep(Duration::from_millis(120));

    assert!(!fixture.cache.contains_entity("Country", &id(1)).unwrap());
    fixture.cache.load_entity("Country", &id(1)).unwrap();
    assert_eq!(fixture.db.load_count(), 2);
}

#[test]
fn test_direct_region_access() {
    let fixture = TestFixture::new();
    fixture.load_countries();
    fixture.cache.load_entity("Country", &id(2)).unwrap();

    let region = fixture.cache.entity_cache_region("Country").unwrap();
    assert_eq!(region.name(), COUNTRY_REGION);

    region.evict_all().unwrap();
    assert!(!fixture.cache.contains_entity("Country", &id(2)).unwrap());

    let query_region = fixture.cache.query_cache_region(None).unwrap();
    assert_eq!(query_region.name(), QUERY_REGION);

    assert!(matches!(
        fixture.cache.query_cache_region(Some("")),
        Err(CacheError::InvalidRegionName(_))
    ));
}
