//! Test fixture for EntityCache integration tests
//!
//! Provides a cache manager in front of an in-memory relational data source.
//! The data source counts every round trip so tests can assert exactly when
//! the cache fell through to storage.
//!
//! Schema:
//! - Country(id, name)
//! - State(id, name, country -> Country, cities <- City.state)
//! - City(id, name, state -> State)
//! - Planet(id, name), read-only
//! - Traveler(id, name), not cacheable

use entitycache::metadata::AssociationKind;
use entitycache::storage::DynStorageDriver;
use entitycache::{
    identifier, Association, AssociationMetadata, CacheConfig, CacheManager, CacheUsage,
    Collection, ColumnShape, DataSource, DataSourceError, DataSourceResult, Entity,
    EntityCacheKey, EntityMetadata, EntityRef, EntityResult, EntityStore, Hydrator,
    IdentifierMap, MetadataProvider, MetadataRegistry, Query, QueryExecutor, RawRow,
    ResultColumn, ResultRow, ResultShape, StatementKind, StatisticsCacheLogger, Value,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const COUNTRY_REGION: &str = "country";
pub const STATE_REGION: &str = "state";
pub const CITY_REGION: &str = "city";
pub const STATE_CITIES_REGION: &str = "state__cities";
pub const QUERY_REGION: &str = "query_cache_region";

/// Entity metadata for the test schema
pub fn schema() -> Arc<MetadataRegistry> {
    let registry = MetadataRegistry::new();
    registry
        .register(
            EntityMetadata::new("Country")
                .with_id("id")
                .with_field("name")
                .cacheable(CacheUsage::NonStrictReadWrite),
        )
        .expect("register Country");
    registry
        .register(
            EntityMetadata::new("State")
                .with_id("id")
                .with_field("name")
                .with_association(AssociationMetadata::to_one("country", "Country"))
                .with_association(AssociationMetadata::to_many("cities", "City", "state"))
                .cacheable(CacheUsage::NonStrictReadWrite),
        )
        .expect("register State");
    registry
        .register(
            EntityMetadata::new("City")
                .with_id("id")
                .with_field("name")
                .with_association(
                    AssociationMetadata::to_one("state", "State").inversed_by("cities"),
                )
                .cacheable(CacheUsage::NonStrictReadWrite),
        )
        .expect("register City");
    registry
        .register(
            EntityMetadata::new("Planet")
                .with_id("id")
                .with_field("name")
                .cacheable(CacheUsage::ReadOnly),
        )
        .expect("register Planet");
    registry
        .register(
            EntityMetadata::new("Traveler")
                .with_id("id")
                .with_field("name"),
        )
        .expect("register Traveler");
    Arc::new(registry)
}

fn hydration_error(message: impl Into<String>) -> DataSourceError {
    DataSourceError::Hydration(message.into())
}

/// In-memory tables keyed by entity type, rows keyed by integer id
///
/// Scalar fields are stored under their field name, to-one associations as
/// the target id under the association name.
pub struct Database {
    metadata: Arc<MetadataRegistry>,
    tables: RwLock<BTreeMap<String, BTreeMap<i64, RawRow>>>,
    queries: AtomicUsize,
    loads: AtomicUsize,
    statements: AtomicUsize,
    failing: AtomicBool,
}

impl Database {
    pub fn new(metadata: Arc<MetadataRegistry>) -> Self {
        Self {
            metadata,
            tables: RwLock::new(BTreeMap::new()),
            queries: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            statements: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, entity_type: &str, id: i64, columns: &[(&str, Value)]) {
        let mut row = RawRow::new();
        row.insert("id".to_string(), Value::Integer(id));
        for (name, value) in columns {
            row.insert(name.to_string(), value.clone());
        }
        self.tables
            .write()
            .entry(entity_type.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn row(&self, entity_type: &str, id: i64) -> Option<RawRow> {
        self.tables
            .read()
            .get(entity_type)
            .and_then(|table| table.get(&id))
            .cloned()
    }

    /// Number of `execute_query` round trips
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of single-entity and collection loads
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    /// Make every query and statement fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> DataSourceResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DataSourceError::Execution("connection refused".to_string()));
        }
        Ok(())
    }

    fn root_type(shape: &ResultShape) -> Option<&str> {
        match shape {
            ResultShape::Entity(result) => Some(&result.entity_type),
            ResultShape::Tuple(columns) => columns.iter().find_map(|c| match c {
                ColumnShape::Entity(result) => Some(result.entity_type.as_str()),
                ColumnShape::Scalar(_) => None,
            }),
            ResultShape::None => None,
        }
    }

    /// Entity with scalar fields, unresolved to-ones and unloaded collections
    fn shell(&self, entity_type: &str, row: &RawRow) -> DataSourceResult<Entity> {
        let meta = self
            .metadata
            .metadata_for(entity_type)
            .ok_or_else(|| hydration_error(format!("unknown type {}", entity_type)))?;
        let id = row
            .get("id")
            .cloned()
            .ok_or_else(|| hydration_error("row without id"))?;

        let mut entity = Entity::new(entity_type, identifier([("id", id)]))
            .map_err(|e| hydration_error(e.to_string()))?;

        for field in meta.fields.iter().filter(|f| !meta.is_identifier(f)) {
            entity.set_field(field.clone(), row.get(field).cloned().unwrap_or(Value::Null));
        }

        for association in &meta.associations {
            let state = match association.kind {
                AssociationKind::ToOne => {
                    let target = match row.get(&association.field).and_then(Value::as_integer) {
                        Some(fk) => Some(EntityRef::Unresolved(
                            EntityCacheKey::new(&association.target, identifier([("id", fk)]))
                                .map_err(|e| hydration_error(e.to_string()))?,
                        )),
                        None => None,
                    };
                    Association::ToOne(target)
                }
                AssociationKind::ToMany => Association::ToMany(Collection::Uninitialized),
            };
            entity.set_association(association.field.clone(), state);
        }

        Ok(entity)
    }

    /// Entity plus the fetch-joined associations of `result`
    fn build(
        &self,
        tables: &BTreeMap<String, BTreeMap<i64, RawRow>>,
        result: &EntityResult,
        row: &RawRow,
    ) -> DataSourceResult<Entity> {
        let meta = self
            .metadata
            .metadata_for(&result.entity_type)
            .ok_or_else(|| hydration_error(format!("unknown type {}", result.entity_type)))?;
        let mut entity = self.shell(&result.entity_type, row)?;

        for join in &result.joins {
            let association = meta
                .association(&join.field)
                .ok_or_else(|| hydration_error(format!("unknown association {}", join.field)))?;

            let state = match association.kind {
                AssociationKind::ToOne => {
                    match row.get(&association.field).and_then(Value::as_integer) {
                        Some(fk) => {
                            let target_row = tables
                                .get(&association.target)
                                .and_then(|t| t.get(&fk))
                                .ok_or_else(|| hydration_error("dangling reference"))?;
                            Association::ToOne(Some(EntityRef::resolved(self.build(
                                tables,
                                &join.target,
                                target_row,
                            )?)))
                        }
                        None => Association::ToOne(None),
                    }
                }
                AssociationKind::ToMany => {
                    let mapped_by = association.mapped_by.clone().unwrap_or_default();
                    let mut items = Vec::new();
                    if let Some(table) = tables.get(&association.target) {
                        for member in table.values().filter(|r| r.get(&mapped_by) == row.get("id")) {
                            items.push(EntityRef::resolved(self.build(tables, &join.target, member)?));
                        }
                    }
                    Association::ToMany(Collection::loaded(items))
                }
            };
            entity.set_association(join.field.clone(), state);
        }

        Ok(entity)
    }

    fn id_of(identifier: &IdentifierMap) -> DataSourceResult<i64> {
        identifier
            .get("id")
            .and_then(Value::as_integer)
            .ok_or_else(|| DataSourceError::Store("expected integer id".to_string()))
    }
}

impl QueryExecutor for Database {
    fn execute_query(&self, query: &Query) -> DataSourceResult<Vec<RawRow>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let root = Self::root_type(&query.shape)
            .ok_or_else(|| DataSourceError::Execution("query selects no entity".to_string()))?;

        let tables = self.tables.read();
        let rows: Vec<RawRow> = tables
            .get(root)
            .map(|table| {
                table
                    .values()
                    .filter(|row| {
                        query
                            .parameters
                            .iter()
                            .all(|(column, value)| row.get(column) == Some(value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let first = query.first_result.unwrap_or(0) as usize;
        let max = query.max_results.map(|m| m as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(first).take(max).collect())
    }

    fn execute_statement(&self, statement: &Query) -> DataSourceResult<u64> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let target = statement
            .target_types
            .first()
            .ok_or_else(|| DataSourceError::Execution("statement without target".to_string()))?;
        let id_filter = statement.parameters.get("id").cloned();

        let mut tables = self.tables.write();
        let table = tables.entry(target.clone()).or_default();
        let matching: Vec<i64> = table
            .iter()
            .filter(|(_, row)| id_filter.as_ref().map_or(true, |id| row.get("id") == Some(id)))
            .map(|(id, _)| *id)
            .collect();

        match statement.kind {
            StatementKind::Update => {
                for id in &matching {
                    if let Some(row) = table.get_mut(id) {
                        for (column, value) in statement.parameters.iter().filter(|(c, _)| *c != "id") {
                            row.insert(column.clone(), value.clone());
                        }
                    }
                }
            }
            StatementKind::Delete => {
                for id in &matching {
                    table.remove(id);
                }
            }
            StatementKind::Insert | StatementKind::Select => {
                return Err(DataSourceError::Execution(
                    "unsupported statement kind".to_string(),
                ))
            }
        }

        Ok(matching.len() as u64)
    }
}

impl Hydrator for Database {
    fn hydrate(&self, rows: Vec<RawRow>, shape: &ResultShape) -> DataSourceResult<Vec<ResultRow>> {
        let tables = self.tables.read();
        rows.iter()
            .map(|row| -> DataSourceResult<ResultRow> {
                match shape {
                    ResultShape::Entity(result) => Ok(ResultRow::Entity(self.build(&tables, result, row)?)),
                    ResultShape::Tuple(columns) => columns
                        .iter()
                        .map(|column| match column {
                            ColumnShape::Entity(result) => {
                                self.build(&tables, result, row).map(ResultColumn::Entity)
                            }
                            ColumnShape::Scalar(alias) => Ok(ResultColumn::Scalar(
                                row.get(alias).cloned().unwrap_or(Value::Null),
                            )),
                        })
                        .collect::<DataSourceResult<Vec<_>>>()
                        .map(ResultRow::Tuple),
                    ResultShape::None => Err(hydration_error("statement has no result")),
                }
            })
            .collect()
    }
}

impl EntityStore for Database {
    fn load(&self, entity_type: &str, identifier: &IdentifierMap) -> DataSourceResult<Option<Entity>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        match self.row(entity_type, Self::id_of(identifier)?) {
            Some(row) => Ok(Some(self.shell(entity_type, &row)?)),
            None => Ok(None),
        }
    }

    fn load_collection(&self, owner: &EntityCacheKey, association: &str) -> DataSourceResult<Vec<Entity>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let meta = self
            .metadata
            .metadata_for(owner.entity_type())
            .ok_or_else(|| DataSourceError::Store("unknown owner type".to_string()))?;
        let mapping = meta
            .association(association)
            .ok_or_else(|| DataSourceError::Store("unknown association".to_string()))?;
        let mapped_by = mapping.mapped_by.clone().unwrap_or_default();
        let owner_id = Value::Integer(Self::id_of(owner.identifier())?);

        let rows: Vec<RawRow> = self
            .tables
            .read()
            .get(&mapping.target)
            .map(|table| {
                table
                    .values()
                    .filter(|row| row.get(&mapped_by) == Some(&owner_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.iter().map(|row| self.shell(&mapping.target, row)).collect()
    }

    fn update(&self, entity: &Entity) -> DataSourceResult<()> {
        self.check_available()?;
        let id = Self::id_of(entity.identifier())?;

        let mut tables = self.tables.write();
        let row = tables
            .get_mut(entity.entity_type())
            .and_then(|table| table.get_mut(&id))
            .ok_or_else(|| DataSourceError::Store("no such row".to_string()))?;

        for (field, value) in entity.fields() {
            row.insert(field.clone(), value.clone());
        }
        for (field, association) in entity.associations() {
            if let Association::ToOne(target) = association {
                let fk = target
                    .as_ref()
                    .and_then(|t| t.key().identifier().get("id").cloned())
                    .unwrap_or(Value::Null);
                row.insert(field.clone(), fk);
            }
        }
        Ok(())
    }

    fn delete(&self, entity: &Entity) -> DataSourceResult<()> {
        self.check_available()?;
        let id = Self::id_of(entity.identifier())?;
        if let Some(table) = self.tables.write().get_mut(entity.entity_type()) {
            table.remove(&id);
        }
        Ok(())
    }
}

/// Cache manager wired to a fresh [`Database`] with the test schema
pub struct TestFixture {
    pub db: Arc<Database>,
    pub metadata: Arc<MetadataRegistry>,
    pub cache: CacheManager,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_driver(config: CacheConfig, driver: Arc<DynStorageDriver>) -> Self {
        Self::build(config, Some(driver))
    }

    fn build(config: CacheConfig, driver: Option<Arc<DynStorageDriver>>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let metadata = schema();
        let db = Arc::new(Database::new(metadata.clone()));
        let source = Self::source_for(&db, &metadata);

        let mut builder = CacheManager::builder(config, source);
        if let Some(driver) = driver {
            builder = builder.with_driver(driver);
        }
        let cache = builder.build().expect("Failed to create cache manager");

        Self {
            db,
            metadata,
            cache,
        }
    }

    fn source_for(db: &Arc<Database>, metadata: &Arc<MetadataRegistry>) -> DataSource {
        DataSource {
            executor: db.clone(),
            hydrator: db.clone(),
            store: db.clone(),
            metadata: metadata.clone(),
        }
    }

    /// Replace the cache manager, keeping the data source
    ///
    /// The old manager is dropped before the new one opens its backend, so
    /// a persistent store can be reopened at the same path.
    pub fn restart(&mut self, config: CacheConfig) {
        let source = Self::source_for(&self.db, &self.metadata);
        self.cache = CacheManager::new(CacheConfig::disabled(), source.clone())
            .expect("Failed to create pass-through manager");
        self.cache = CacheManager::new(config, source).expect("Failed to restart cache manager");
    }

    pub fn stats(&self) -> Arc<StatisticsCacheLogger> {
        self.cache.statistics()
    }

    /// Germany (1) and France (2)
    pub fn load_countries(&self) {
        self.db.insert("Country", 1, &[("name", Value::from("Germany"))]);
        self.db.insert("Country", 2, &[("name", Value::from("France"))]);
    }

    /// Countries plus Bavaria (1) and Brittany (2)
    pub fn load_states(&self) {
        self.load_countries();
        self.db.insert(
            "State",
            1,
            &[("name", Value::from("Bavaria")), ("country", Value::from(1))],
        );
        self.db.insert(
            "State",
            2,
            &[("name", Value::from("Brittany")), ("country", Value::from(2))],
        );
    }

    /// States plus Munich (1), Nuremberg (2) in Bavaria and Rennes (3) in
    /// Brittany
    pub fn load_cities(&self) {
        self.load_states();
        self.db.insert(
            "City",
            1,
            &[("name", Value::from("Munich")), ("state", Value::from(1))],
        );
        self.db.insert(
            "City",
            2,
            &[("name", Value::from("Nuremberg")), ("state", Value::from(1))],
        );
        self.db.insert(
            "City",
            3,
            &[("name", Value::from("Rennes")), ("state", Value::from(2))],
        );
    }

    pub fn countries_query() -> Query {
        Query::select(
            "SELECT c.id, c.name FROM Country c",
            ResultShape::Entity(EntityResult::new("Country")),
        )
    }

    pub fn cities_with_state_query() -> Query {
        Query::select(
            "SELECT c, s FROM City c JOIN c.state s",
            ResultShape::Entity(EntityResult::new("City").join("state", EntityResult::new("State"))),
        )
    }

    pub fn states_with_cities_query() -> Query {
        Query::select(
            "SELECT s, c FROM State s JOIN s.cities c",
            ResultShape::Entity(EntityResult::new("State").join("cities", EntityResult::new("City"))),
        )
    }
}

/// Names of the entities in a result, in row order
pub fn names(rows: &[ResultRow]) -> Vec<String> {
    rows.iter()
        .filter_map(ResultRow::as_entity)
        .filter_map(|e| e.field("name").and_then(|v| v.as_string()).map(str::to_string))
        .collect()
}

pub fn id(value: i64) -> IdentifierMap {
    identifier([("id", value)])
}
