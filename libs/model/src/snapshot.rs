//! The snapshot document consumed once per polling cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Allocation, Job, JobResource, Node, NodePartition, NodeResource, Partition};

/// One complete observation of cluster state.
///
/// A snapshot is authoritative: any entity absent from it is considered
/// retired by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the scheduler state was observed.
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub node_partitions: Vec<NodePartition>,
    #[serde(default)]
    pub node_resources: Vec<NodeResource>,
    #[serde(default)]
    pub job_resources: Vec<JobResource>,
    #[serde(default)]
    pub allocations: Vec<Allocation>,
}

impl Snapshot {
    /// An empty snapshot observed at the given instant.
    pub fn empty(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            nodes: Vec::new(),
            partitions: Vec::new(),
            jobs: Vec::new(),
            node_partitions: Vec::new(),
            node_resources: Vec::new(),
            job_resources: Vec::new(),
            allocations: Vec::new(),
        }
    }

    /// Total number of rows across all collections.
    pub fn row_count(&self) -> usize {
        self.nodes.len()
            + self.partitions.len()
            + self.jobs.len()
            + self.node_partitions.len()
            + self.node_resources.len()
            + self.job_resources.len()
            + self.allocations.len()
    }
}
