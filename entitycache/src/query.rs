// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query descriptions
//!
//! A [`Query`] carries the statement text, bound parameters, pagination and the
//! expected result shape. The shape tells the cache which entity types (and
//! which fetch-joined associations) each result row is made of, so cached
//! results can be reconstructed without consulting storage.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::cache::CacheMode;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// An entity in a result, plus the associations fetched together with it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity_type: String,
    pub joins: Vec<JoinedAssociation>,
}

impl EntityResult {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            joins: Vec::new(),
        }
    }

    /// Fetch-join `field`, whose target is described by `target`
    pub fn join(mut self, field: impl Into<String>, target: EntityResult) -> Self {
        self.joins.push(JoinedAssociation {
            field: field.into(),
            target,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinedAssociation {
    pub field: String,
    pub target: EntityResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnShape {
    Entity(EntityResult),
    /// Scalar column by alias
    Scalar(String),
}

/// Shape of every row in a result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultShape {
    Entity(EntityResult),
    Tuple(Vec<ColumnShape>),
    /// Statements that return an affected-row count
    None,
}

impl ResultShape {
    /// Every entity result in the shape, joined targets included
    pub fn entity_results(&self) -> Vec<&EntityResult> {
        fn walk<'a>(result: &'a EntityResult, out: &mut Vec<&'a EntityResult>) {
            out.push(result);
            for join in &result.joins {
                walk(&join.target, out);
            }
        }

        let mut out = Vec::new();
        match self {
            ResultShape::Entity(result) => walk(result, &mut out),
            ResultShape::Tuple(columns) => {
                for column in columns {
                    if let ColumnShape::Entity(result) = column {
                        walk(result, &mut out);
                    }
                }
            }
            ResultShape::None => {}
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHints {
    /// Evict affected entity regions after a successful mutating statement
    pub evict_on_success: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub kind: StatementKind,
    pub parameters: BTreeMap<String, Value>,
    pub first_result: Option<u64>,
    pub max_results: Option<u64>,
    pub shape: ResultShape,
    /// Query selects only part of each entity's fields
    pub partial: bool,
    /// Entity types written by a mutating statement
    pub target_types: Vec<String>,
    pub hints: QueryHints,
}

impl Query {
    fn with_kind(text: impl Into<String>, kind: StatementKind, shape: ResultShape) -> Self {
        Self {
            text: text.into(),
            kind,
            parameters: BTreeMap::new(),
            first_result: None,
            max_results: None,
            shape,
            partial: false,
            target_types: Vec::new(),
            hints: QueryHints::default(),
        }
    }

    pub fn select(text: impl Into<String>, shape: ResultShape) -> Self {
        Self::with_kind(text, StatementKind::Select, shape)
    }

    pub fn insert(text: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(text, StatementKind::Insert, ResultShape::None).targeting(target)
    }

    pub fn update(text: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(text, StatementKind::Update, ResultShape::None).targeting(target)
    }

    pub fn delete(text: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(text, StatementKind::Delete, ResultShape::None).targeting(target)
    }

    pub fn targeting(mut self, entity_type: impl Into<String>) -> Self {
        self.target_types.push(entity_type.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_first_result(mut self, first: u64) -> Self {
        self.first_result = Some(first);
        self
    }

    pub fn with_max_results(mut self, max: u64) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn with_partial_entities(mut self) -> Self {
        self.partial = true;
        self
    }

    /// Request region eviction of the target types once the statement succeeds
    pub fn mark_evict_on_success(mut self) -> Self {
        self.hints.evict_on_success = true;
        self
    }

    pub fn is_select(&self) -> bool {
        self.kind == StatementKind::Select
    }

    /// Text with whitespace runs outside quoted literals collapsed
    pub fn normalized_text(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut quote: Option<char> = None;
        let mut pending_space = false;

        for ch in self.text.trim().chars() {
            match quote {
                Some(open) => {
                    out.push(ch);
                    if ch == open {
                        quote = None;
                    }
                }
                None if ch.is_whitespace() => pending_space = true,
                None => {
                    if pending_space {
                        out.push(' ');
                        pending_space = false;
                    }
                    if ch == '\'' || ch == '"' {
                        quote = Some(ch);
                    }
                    out.push(ch);
                }
            }
        }
        out
    }

    /// Stable fingerprint of everything that determines the result
    ///
    /// Covers the normalized text, parameters (by name), pagination and the
    /// result shape. Two queries differing in any of these never share a key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        write_field(&mut hasher, "text", self.normalized_text().as_bytes());

        for (name, value) in &self.parameters {
            write_field(&mut hasher, "param", name.as_bytes());
            write_field(&mut hasher, value.type_name(), value_bytes(value).as_slice());
        }

        write_field(&mut hasher, "first", page_bytes(self.first_result).as_slice());
        write_field(&mut hasher, "max", page_bytes(self.max_results).as_slice());
        write_shape(&mut hasher, &self.shape);

        hex::encode(hasher.finalize())
    }
}

/// Options for one cacheable query execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCacheOptions {
    pub mode: CacheMode,
    /// Lifetime in seconds; the configured default applies when absent
    pub lifetime: Option<u64>,
    /// Query region override
    pub region: Option<String>,
}

impl QueryCacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_lifetime(mut self, seconds: u64) -> Self {
        self.lifetime = Some(seconds);
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

// Length-prefixed writes keep field boundaries unambiguous
fn write_field(hasher: &mut Sha256, tag: &str, bytes: &[u8]) {
    hasher.update((tag.len() as u64).to_le_bytes());
    hasher.update(tag.as_bytes());
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn value_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => Vec::new(),
        Value::Boolean(b) => vec![*b as u8],
        Value::Integer(n) => n.to_le_bytes().to_vec(),
        Value::Float(n) => n.to_bits().to_le_bytes().to_vec(),
        Value::String(s) => s.as_bytes().to_vec(),
        Value::DateTime(dt) => {
            let mut bytes = dt.timestamp().to_le_bytes().to_vec();
            bytes.extend_from_slice(&dt.timestamp_subsec_nanos().to_le_bytes());
            bytes
        }
    }
}

fn page_bytes(page: Option<u64>) -> Vec<u8> {
    match page {
        Some(n) => n.to_le_bytes().to_vec(),
        None => b"none".to_vec(),
    }
}

fn write_shape(hasher: &mut Sha256, shape: &ResultShape) {
    match shape {
        ResultShape::Entity(result) => {
            write_field(hasher, "shape", b"entity");
            write_entity_result(hasher, result);
        }
        ResultShape::Tuple(columns) => {
            write_field(hasher, "shape", b"tuple");
            for column in columns {
                match column {
                    ColumnShape::Entity(result) => {
                        write_field(hasher, "column", b"entity");
                        write_entity_result(hasher, result);
                    }
                    ColumnShape::Scalar(alias) => write_field(hasher, "scalar", alias.as_bytes()),
                }
            }
        }
        ResultShape::None => write_field(hasher, "shape", b"none"),
    }
}

fn write_entity_result(hasher: &mut Sha256, result: &EntityResult) {
    write_field(hasher, "type", result.entity_type.as_bytes());
    for join in &result.joins {
        write_field(hasher, "join", join.field.as_bytes());
        write_entity_result(hasher, &join.target);
    }
    write_field(hasher, "end", b"");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn countries() -> Query {
        Query::select(
            "SELECT c.id, c.name FROM Country c",
            ResultShape::Entity(EntityResult::new("Country")),
        )
    }

    #[test]
    fn test_fingerprint_is_stable_and_whitespace_insensitive() {
        let a = countries();
        let b = Query::select(
            "SELECT c.id,   c.name\n FROM Country c",
            ResultShape::Entity(EntityResult::new("Country")),
        );
        assert_eq!(a.fingerprint(), a.fingerprint());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_keeps_whitespace_inside_literals() {
        let shape = || ResultShape::Entity(EntityResult::new("City"));
        let wide = Query::select("SELECT c FROM City c WHERE c.name = 'New  York'", shape());
        let narrow = Query::select("SELECT c FROM City c WHERE c.name = 'New York'", shape());
        let spaced = Query::select("SELECT c\n FROM City c  WHERE c.name = 'New  York'", shape());

        assert_eq!(wide.normalized_text(), "SELECT c FROM City c WHERE c.name = 'New  York'");
        assert_ne!(wide.fingerprint(), narrow.fingerprint());
        assert_eq!(wide.fingerprint(), spaced.fingerprint());
    }

    #[test]
    fn test_normalized_text_handles_escaped_quotes() {
        let query = Query::select(
            "SELECT c FROM City c  WHERE c.name = 'O''  Hare'   AND c.id = 1",
            ResultShape::Entity(EntityResult::new("City")),
        );
        assert_eq!(
            query.normalized_text(),
            "SELECT c FROM City c WHERE c.name = 'O''  Hare' AND c.id = 1"
        );
    }

    #[test]
    fn test_fingerprint_covers_parameters_and_pagination() {
        let base = countries();
        let by_name = countries().with_parameter("name", "Germany");
        let by_other_name = countries().with_parameter("name", "France");
        let paged = countries().with_first_result(0).with_max_results(1);
        let next_page = countries().with_first_result(1).with_max_results(1);

        let prints = [
            base.fingerprint(),
            by_name.fingerprint(),
            by_other_name.fingerprint(),
            paged.fingerprint(),
            next_page.fingerprint(),
        ];
        for (i, a) in prints.iter().enumerate() {
            for b in prints.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_fingerprint_distinguishes_parameter_types() {
        let int_param = countries().with_parameter("id", 1);
        let str_param = countries().with_parameter("id", "1");
        assert_ne!(int_param.fingerprint(), str_param.fingerprint());
    }

    #[test]
    fn test_fingerprint_covers_fetch_joins() {
        let plain = Query::select("SELECT c FROM City c", ResultShape::Entity(EntityResult::new("City")));
        let joined = Query::select(
            "SELECT c FROM City c",
            ResultShape::Entity(EntityResult::new("City").join("state", EntityResult::new("State"))),
        );
        assert_ne!(plain.fingerprint(), joined.fingerprint());
    }

    #[test]
    fn test_entity_results_walks_joins_and_columns() {
        let shape = ResultShape::Tuple(vec![
            ColumnShape::Entity(EntityResult::new("State").join("cities", EntityResult::new("City"))),
            ColumnShape::Scalar("total".into()),
        ]);
        let types: Vec<_> = shape
            .entity_results()
            .iter()
            .map(|r| r.entity_type.as_str())
            .collect();
        assert_eq!(types, vec!["State", "City"]);
    }

    #[test]
    fn test_mutating_statements_carry_targets() {
        let stmt = Query::update("UPDATE Country c SET c.name = 'x'", "Country").mark_evict_on_success();
        assert!(!stmt.is_select());
        assert!(stmt.hints.evict_on_success);
        assert_eq!(stmt.target_types, vec!["Country".to_string()]);
    }
}
