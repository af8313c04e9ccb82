//! The committed cluster state and its read surface.
//!
//! Readers load an `Arc` to an immutable committed state and never block.
//! The reconciler replaces that pointer in a single atomic store, so a
//! reader sees either the previous commit or the next one in full. The
//! stamp travels inside the same pointer, so the version a reader sees
//! always belongs to the rows it sees.

use std::sync::Arc;

use clusterboard_model::{
    Allocation, Job, JobId, JobResource, Node, NodeName, NodeResource, Partition, PartitionName,
};
use serde::Serialize;
use tracing::warn;

use crate::aggregates::{PartitionSummary, ResourceFigures};
use crate::clock::{StalenessClock, Stamp, Stamped, Version};
use crate::state::ClusterState;

/// A committed state together with the stamp it was committed under.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedState {
    pub state: ClusterState,
    pub stamp: Stamp,
}

impl Stamped for CommittedState {
    fn stamp(&self) -> &Stamp {
        &self.stamp
    }
}

/// A node with its derived figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    #[serde(flatten)]
    pub usage: ResourceFigures,
    pub partitions: Vec<PartitionName>,
}

/// A partition with its derived aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionView {
    #[serde(flatten)]
    pub partition: Partition,
    #[serde(flatten)]
    pub summary: PartitionSummary,
}

/// Read-only access to the last committed cluster state.
#[derive(Debug)]
pub struct ClusterStore {
    committed: StalenessClock<CommittedState>,
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStore {
    /// An empty store at version 0.
    pub fn new() -> Self {
        Self::with_state(ClusterState::default(), Stamp::initial())
    }

    pub(crate) fn with_state(state: ClusterState, stamp: Stamp) -> Self {
        Self {
            committed: StalenessClock::new(CommittedState { state, stamp }),
        }
    }

    /// Full committed state and its stamp.
    pub fn snapshot(&self) -> Arc<CommittedState> {
        self.committed.current()
    }

    /// Stamp of the committed state, without touching the rows.
    pub fn version(&self) -> Stamp {
        self.committed.stamp()
    }

    pub fn clock(&self) -> &StalenessClock<CommittedState> {
        &self.committed
    }

    pub fn changed_since(&self, version: Version) -> bool {
        self.committed.changed_since(version)
    }

    pub fn node(&self, name: &NodeName) -> Option<NodeView> {
        let committed = self.committed.current();
        let state = &committed.state;
        let node = state.node(name)?.clone();
        Some(NodeView {
            node,
            usage: state.node_usage(name).copied().unwrap_or_default(),
            partitions: state.entities().partitions_of(name).cloned().collect(),
        })
    }

    pub fn partition(&self, name: &PartitionName) -> Option<PartitionView> {
        let committed = self.committed.current();
        let state = &committed.state;
        let partition = state.partition(name)?.clone();
        Some(PartitionView {
            partition,
            summary: state.partition_summary(name).copied().unwrap_or_default(),
        })
    }

    pub fn job(&self, id: &JobId) -> Option<Job> {
        self.committed.current().state.job(id).cloned()
    }

    pub fn node_resources(&self, name: &NodeName) -> Vec<NodeResource> {
        self.committed
            .current()
            .state
            .ledger()
            .resources_of_node(name)
            .cloned()
            .collect()
    }

    pub fn job_resources(&self, id: &JobId) -> Vec<JobResource> {
        self.committed
            .current()
            .state
            .ledger()
            .resources_of_job(id)
            .cloned()
            .collect()
    }

    pub fn allocations_for_job(&self, id: &JobId) -> Vec<Allocation> {
        self.committed
            .current()
            .state
            .allocations()
            .for_job(id)
            .cloned()
            .collect()
    }

    pub fn allocations_for_node(&self, name: &NodeName) -> Vec<Allocation> {
        self.committed
            .current()
            .state
            .allocations()
            .for_node(name)
            .cloned()
            .collect()
    }

    pub fn partitions_of(&self, name: &NodeName) -> Vec<PartitionName> {
        self.committed
            .current()
            .state
            .entities()
            .partitions_of(name)
            .cloned()
            .collect()
    }

    /// Make a new state and its stamp visible in one swap.
    pub(crate) fn publish(&self, committed: CommittedState) {
        let version = committed.stamp.version;
        if !self.committed.advance(committed) {
            warn!(%version, "Ignored publish older than the committed state");
        }
    }
}
