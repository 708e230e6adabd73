// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Bulk invalidation of cache regions
//!
//! Mutating statements bypass the persister, so the cache cannot know which
//! rows changed. When such a statement is marked for eviction, whole regions
//! are dropped instead: the entity regions of the written types (plus any
//! types reached through cascading associations), the collection regions that
//! own or list those types, and every query region.

use parking_lot::RwLock;
use petgraph::algo::dijkstra;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::region::RegionExt;
use super::region_registry::RegionRegistry;
use crate::error::CacheResult;
use crate::metadata::{AssociationKind, MetadataProvider};
use crate::query::StatementKind;

/// Events that trigger region invalidation
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidationEvent {
    /// A mutating statement completed successfully
    BulkStatement {
        kind: StatementKind,
        targets: Vec<String>,
        affected_rows: u64,
    },
}

impl InvalidationEvent {
    fn entity_types(&self) -> &[String] {
        match self {
            InvalidationEvent::BulkStatement { targets, .. } => targets,
        }
    }
}

/// Result of invalidation operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationResult {
    pub entity_types: Vec<String>,
    pub regions_evicted: Vec<String>,
    /// Longest cascade path followed from a written type
    pub cascade_depth: usize,
    pub duration: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationStats {
    pub total_events: u64,
    pub total_regions_evicted: u64,
    pub cascade_invalidations: u64,
}

/// Directed graph of `cascade_evict` associations between entity types
pub struct EvictionCascade {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl EvictionCascade {
    pub fn build(metadata: &dyn MetadataProvider) -> Self {
        let mut cascade = Self {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        };

        for entity_type in metadata.entity_types() {
            let Some(meta) = metadata.metadata_for(&entity_type) else {
                continue;
            };
            let owner = cascade.node(&entity_type);
            for association in meta.associations.iter().filter(|a| a.cascade_evict) {
                let target = cascade.node(&association.target);
                cascade.graph.update_edge(owner, target, ());
            }
        }

        cascade
    }

    fn node(&mut self, entity_type: &str) -> NodeIndex {
        if let Some(index) = self.nodes.get(entity_type) {
            return *index;
        }
        let index = self.graph.add_node(entity_type.to_string());
        self.nodes.insert(entity_type.to_string(), index);
        index
    }

    /// Types reachable from `roots` (roots included) and the cascade depth
    pub fn affected_types(&self, roots: &[String]) -> (BTreeSet<String>, usize) {
        let mut affected: BTreeSet<String> = roots.iter().cloned().collect();
        let mut depth = 0;

        for root in roots {
            let Some(start) = self.nodes.get(root) else {
                continue;
            };
            for (node, distance) in dijkstra(&self.graph, *start, None, |_| 1usize) {
                affected.insert(self.graph[node].clone());
                depth = depth.max(distance);
            }
        }

        (affected, depth)
    }
}

/// Invalidation manager coordinating region eviction
pub struct InvalidationManager {
    registry: Arc<RegionRegistry>,
    metadata: Arc<dyn MetadataProvider>,
    history: RwLock<VecDeque<(InvalidationEvent, InvalidationResult)>>,
    max_history_size: usize,
    stats: RwLock<InvalidationStats>,
}

impl InvalidationManager {
    pub fn new(
        registry: Arc<RegionRegistry>,
        metadata: Arc<dyn MetadataProvider>,
        max_history_size: usize,
    ) -> Self {
        Self {
            registry,
            metadata,
            history: RwLock::new(VecDeque::new()),
            max_history_size,
            stats: RwLock::new(InvalidationStats::default()),
        }
    }

    /// Handle invalidation event
    pub fn handle_event(&self, event: InvalidationEvent) -> CacheResult<InvalidationResult> {
        let start_time = Instant::now();

        for entity_type in event.entity_types() {
            self.metadata.require(entity_type)?;
        }

        let cascade = EvictionCascade::build(self.metadata.as_ref());
        let (affected, cascade_depth) = cascade.affected_types(event.entity_types());

        let mut regions = BTreeSet::new();
        for entity_type in &affected {
            let meta = self.metadata.require(entity_type)?;
            if !meta.is_cacheable() {
                continue;
            }
            regions.insert(self.registry.entity_region_name(entity_type)?);
            for association in meta.to_many_associations() {
                regions.insert(
                    self.registry
                        .collection_region_name(entity_type, &association.field)?,
                );
            }
        }

        // Collections on other types that list an affected type
        for owner_type in self.metadata.entity_types() {
            let Some(owner) = self.metadata.metadata_for(&owner_type) else {
                continue;
            };
            if !owner.is_cacheable() {
                continue;
            }
            for association in owner.associations.iter().filter(|a| {
                a.kind == AssociationKind::ToMany && affected.contains(&a.target)
            }) {
                regions.insert(
                    self.registry
                        .collection_region_name(&owner_type, &association.field)?,
                );
            }
        }

        regions.extend(self.registry.query_region_names());

        for name in &regions {
            self.registry.region(name)?.evict_all_quietly();
        }

        let result = InvalidationResult {
            entity_types: affected.into_iter().collect(),
            regions_evicted: regions.into_iter().collect(),
            cascade_depth,
            duration: start_time.elapsed(),
        };

        log::info!(
            "Invalidated {} cache regions for {:?}",
            result.regions_evicted.len(),
            result.entity_types
        );
        self.record(event, &result);
        Ok(result)
    }

    fn record(&self, event: InvalidationEvent, result: &InvalidationResult) {
        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            stats.total_regions_evicted += result.regions_evicted.len() as u64;
            if result.cascade_depth > 0 {
                stats.cascade_invalidations += 1;
            }
        }

        if self.max_history_size == 0 {
            return;
        }
        let mut history = self.history.write();
        if history.len() >= self.max_history_size {
            history.pop_front();
        }
        history.push_back((event, result.clone()));
    }

    pub fn stats(&self) -> InvalidationStats {
        *self.stats.read()
    }

    /// Most recent events first
    pub fn recent_events(&self, limit: Option<usize>) -> Vec<(InvalidationEvent, InvalidationResult)> {
        let history = self.history.read();
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }
}
