//! Per-table differences between the committed state and a snapshot.

use clusterboard_model::{
    Allocation, Job, JobResource, Node, NodePartition, NodeResource, Partition, Snapshot,
};
use serde::{Deserialize, Serialize};

use crate::state::ClusterState;
use crate::table::{TableCounts, TableDiff};

/// Inserts, updates, refreshes and deletes for every table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub nodes: TableDiff<Node>,
    pub partitions: TableDiff<Partition>,
    pub jobs: TableDiff<Job>,
    pub node_partitions: TableDiff<NodePartition>,
    pub node_resources: TableDiff<NodeResource>,
    pub job_resources: TableDiff<JobResource>,
    pub allocations: TableDiff<Allocation>,
}

impl ChangeSet {
    /// Diff a validated snapshot against a state.
    pub fn compute(state: &ClusterState, snapshot: &Snapshot) -> Self {
        Self {
            nodes: state.entities.nodes().diff(&snapshot.nodes),
            partitions: state.entities.partitions().diff(&snapshot.partitions),
            jobs: state.entities.jobs().diff(&snapshot.jobs),
            node_partitions: state.entities.memberships().diff(&snapshot.node_partitions),
            node_resources: state.ledger.node_resources().diff(&snapshot.node_resources),
            job_resources: state.ledger.job_resources().diff(&snapshot.job_resources),
            allocations: state.allocations.rows().diff(&snapshot.allocations),
        }
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            nodes: self.nodes.counts(),
            partitions: self.partitions.counts(),
            jobs: self.jobs.counts(),
            node_partitions: self.node_partitions.counts(),
            node_resources: self.node_resources.counts(),
            job_resources: self.job_resources.counts(),
            allocations: self.allocations.counts(),
        }
    }
}

/// Row counts of a [`ChangeSet`], per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub nodes: TableCounts,
    pub partitions: TableCounts,
    pub jobs: TableCounts,
    pub node_partitions: TableCounts,
    pub node_resources: TableCounts,
    pub job_resources: TableCounts,
    pub allocations: TableCounts,
}

impl ChangeSummary {
    fn tables(&self) -> [&TableCounts; 7] {
        [
            &self.nodes,
            &self.partitions,
            &self.jobs,
            &self.node_partitions,
            &self.node_resources,
            &self.job_resources,
            &self.allocations,
        ]
    }

    pub fn inserted(&self) -> usize {
        self.tables().iter().map(|t| t.inserted).sum()
    }

    pub fn updated(&self) -> usize {
        self.tables().iter().map(|t| t.updated).sum()
    }

    pub fn touched(&self) -> usize {
        self.tables().iter().map(|t| t.touched).sum()
    }

    pub fn deleted(&self) -> usize {
        self.tables().iter().map(|t| t.deleted).sum()
    }

    /// Inserts, updates and deletes across every table.
    pub fn churn(&self) -> usize {
        self.tables().iter().map(|t| t.churn()).sum()
    }

    /// True when the snapshot changed no row content.
    pub fn is_noop(&self) -> bool {
        self.churn() == 0
    }
}
