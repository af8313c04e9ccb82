//! The cluster state: entity store, resource ledger, allocation graph and
//! the aggregates derived from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use clusterboard_model::{
    Job, JobId, Node, NodeName, Partition, PartitionName, ResourceKind, Snapshot,
};

use crate::aggregates::{self, PartitionSummary, ResourceFigures};
use crate::allocations::AllocationGraph;
use crate::entities::EntityStore;
use crate::ledger::ResourceLedger;

/// One consistent version of the cluster state.
///
/// A committed `ClusterState` is immutable. The reconciler mutates a private
/// clone and publishes it whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterState {
    pub(crate) entities: EntityStore,
    pub(crate) ledger: ResourceLedger,
    pub(crate) allocations: AllocationGraph,
    node_usage: BTreeMap<NodeName, ResourceFigures>,
    partition_summaries: BTreeMap<PartitionName, PartitionSummary>,
}

impl ClusterState {
    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn allocations(&self) -> &AllocationGraph {
        &self.allocations
    }

    pub fn node(&self, name: &NodeName) -> Option<&Node> {
        self.entities.node(name)
    }

    pub fn partition(&self, name: &PartitionName) -> Option<&Partition> {
        self.entities.partition(name)
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.entities.job(id)
    }

    /// Derived CPU and memory figures of a node.
    pub fn node_usage(&self, name: &NodeName) -> Option<&ResourceFigures> {
        self.node_usage.get(name)
    }

    /// Derived aggregates of a partition.
    pub fn partition_summary(&self, name: &PartitionName) -> Option<&PartitionSummary> {
        self.partition_summaries.get(name)
    }

    pub fn node_usages(&self) -> &BTreeMap<NodeName, ResourceFigures> {
        &self.node_usage
    }

    pub fn partition_summaries(&self) -> &BTreeMap<PartitionName, PartitionSummary> {
        &self.partition_summaries
    }

    /// Capacity of a node for a resource kind.
    pub fn capacity(&self, node: &NodeName, kind: &ResourceKind) -> u64 {
        aggregates::node_capacity(&self.entities, &self.ledger, node, kind)
    }

    /// Total rows across all tables.
    pub fn row_count(&self) -> usize {
        self.entities.nodes().len()
            + self.entities.partitions().len()
            + self.entities.jobs().len()
            + self.entities.memberships().len()
            + self.ledger.node_resources().len()
            + self.ledger.job_resources().len()
            + self.allocations.rows().len()
    }

    /// Rebuild node and partition aggregates from the current rows.
    ///
    /// Previous aggregates are discarded, never adjusted.
    pub(crate) fn recompute_aggregates(&mut self) {
        self.node_usage = aggregates::node_usage(&self.entities, &self.ledger, &self.allocations);
        self.partition_summaries =
            aggregates::partition_summaries(&self.entities, &self.node_usage);
    }

    /// Render the state as a snapshot document, rows in key order.
    pub fn to_snapshot(&self, observed_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            observed_at,
            nodes: self.entities.nodes().iter().cloned().collect(),
            partitions: self.entities.partitions().iter().cloned().collect(),
            jobs: self.entities.jobs().iter().cloned().collect(),
            node_partitions: self.entities.memberships().iter().cloned().collect(),
            node_resources: self.ledger.node_resources().iter().cloned().collect(),
            job_resources: self.ledger.job_resources().iter().cloned().collect(),
            allocations: self.allocations.rows().iter().cloned().collect(),
        }
    }
}
