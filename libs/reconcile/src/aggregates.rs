//! Derived node and partition aggregates.
//!
//! Aggregates are never stored as a source of truth: they are recomputed
//! from member rows after every reconciliation.

use std::collections::BTreeMap;

use clusterboard_model::{NodeName, PartitionName, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::allocations::AllocationGraph;
use crate::entities::EntityStore;
use crate::ledger::ResourceLedger;

/// CPU and memory figures for a node or a group of nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFigures {
    pub cpus_total: u64,
    pub cpus_alloc: u64,
    pub cpus_idle: u64,
    pub memory_total_mb: u64,
    pub memory_alloc_mb: u64,
    pub memory_free_mb: u64,
}

impl ResourceFigures {
    /// Add another node's figures. Sums saturate at `u64::MAX`.
    fn accumulate(&mut self, other: &ResourceFigures) {
        self.cpus_total = self.cpus_total.saturating_add(other.cpus_total);
        self.cpus_alloc = self.cpus_alloc.saturating_add(other.cpus_alloc);
        self.cpus_idle = self.cpus_idle.saturating_add(other.cpus_idle);
        self.memory_total_mb = self.memory_total_mb.saturating_add(other.memory_total_mb);
        self.memory_alloc_mb = self.memory_alloc_mb.saturating_add(other.memory_alloc_mb);
        self.memory_free_mb = self.memory_free_mb.saturating_add(other.memory_free_mb);
    }
}

/// Aggregates of one partition, summed over its member nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub node_count: u64,
    #[serde(flatten)]
    pub figures: ResourceFigures,
}

/// Capacity of a node for a resource kind.
///
/// The node resource row's total wins; CPU and memory fall back to the
/// node's configured totals; any other kind without a row has no capacity.
pub fn node_capacity(
    entities: &EntityStore,
    ledger: &ResourceLedger,
    node: &NodeName,
    kind: &ResourceKind,
) -> u64 {
    if let Some(row) = ledger.node_resource(node, kind) {
        return row.total;
    }
    match entities.node(node) {
        Some(n) if kind.is_cpu() => n.cpus,
        Some(n) if kind.is_memory() => n.memory_mb,
        _ => 0,
    }
}

/// Figures for every node, keyed by node name.
pub(crate) fn node_usage(
    entities: &EntityStore,
    ledger: &ResourceLedger,
    graph: &AllocationGraph,
) -> BTreeMap<NodeName, ResourceFigures> {
    let cpu = ResourceKind::cpu();
    let memory = ResourceKind::memory();

    entities
        .nodes()
        .keys()
        .map(|name| {
            let cpus_total = node_capacity(entities, ledger, name, &cpu);
            let cpus_alloc = graph.used_on(name, &cpu);
            let memory_total_mb = node_capacity(entities, ledger, name, &memory);
            let memory_alloc_mb = graph.used_on(name, &memory);
            let figures = ResourceFigures {
                cpus_total,
                cpus_alloc,
                cpus_idle: cpus_total.saturating_sub(cpus_alloc),
                memory_total_mb,
                memory_alloc_mb,
                memory_free_mb: memory_total_mb.saturating_sub(memory_alloc_mb),
            };
            (name.clone(), figures)
        })
        .collect()
}

/// Summaries for every partition, summed from the given node figures.
pub(crate) fn partition_summaries(
    entities: &EntityStore,
    nodes: &BTreeMap<NodeName, ResourceFigures>,
) -> BTreeMap<PartitionName, PartitionSummary> {
    entities
        .partitions()
        .keys()
        .map(|name| {
            let mut summary = PartitionSummary::default();
            for member in entities.members_of(name) {
                if let Some(figures) = nodes.get(member) {
                    summary.node_count += 1;
                    summary.figures.accumulate(figures);
                }
            }
            (name.clone(), summary)
        })
        .collect()
}
