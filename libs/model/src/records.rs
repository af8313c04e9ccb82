//! Entity and relation records.
//!
//! Every record kind is a row of one logical table and implements [`Row`],
//! which names the table and extracts the row's unique key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus, NodeName, NodeStatus, PartitionName, PartitionStatus, ResourceKind};

/// A record stored in one keyed table.
pub trait Row: Clone + PartialEq + std::fmt::Debug {
    /// Unique key of the row within its table.
    type Key: Ord + Clone + std::fmt::Debug;

    /// Table name, used in diagnostics and by the persistence mirror.
    const TABLE: &'static str;

    /// Extract the row's key.
    fn key(&self) -> Self::Key;

    /// Value equality ignoring the row's observation timestamp.
    ///
    /// Rows that differ only in `updated_at` are refreshed in place and are
    /// not counted as changes.
    fn same_content(&self, other: &Self) -> bool {
        self == other
    }
}

/// A compute node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeName,
    pub status: NodeStatus,
    /// Total CPUs configured on the node.
    pub cpus: u64,
    /// Total real memory in MiB.
    pub memory_mb: u64,
    pub updated_at: DateTime<Utc>,
}

/// A named grouping of nodes with shared scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: PartitionName,
    pub status: PartitionStatus,
    /// Default QoS policy of the partition.
    #[serde(default)]
    pub qos: Option<String>,
    /// QoS policies jobs may request in this partition.
    #[serde(default)]
    pub allow_qos: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub user: String,
    pub partition: PartitionName,
    pub status: JobStatus,
    /// Wall-clock limit as reported by the scheduler (for example `12:00:00`).
    #[serde(default)]
    pub time_limit: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub submit_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership of a node in a partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodePartition {
    pub node: NodeName,
    pub partition: PartitionName,
}

/// Capacity of one resource kind on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResource {
    pub node: NodeName,
    pub kind: ResourceKind,
    pub total: u64,
    pub available: u64,
}

/// Request and allocation of one resource kind for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResource {
    pub job: JobId,
    pub kind: ResourceKind,
    pub requested: u64,
    pub allocated: u64,
}

/// Quantity of a resource kind a job uses on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub job: JobId,
    pub node: NodeName,
    pub kind: ResourceKind,
    pub used: u64,
}

impl Row for Node {
    type Key = NodeName;
    const TABLE: &'static str = "nodes";

    fn key(&self) -> Self::Key {
        self.name.clone()
    }

    fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.status == other.status
            && self.cpus == other.cpus
            && self.memory_mb == other.memory_mb
    }
}

impl Row for Partition {
    type Key = PartitionName;
    const TABLE: &'static str = "partitions";

    fn key(&self) -> Self::Key {
        self.name.clone()
    }

    fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.status == other.status
            && self.qos == other.qos
            && self.allow_qos == other.allow_qos
    }
}

impl Row for Job {
    type Key = JobId;
    const TABLE: &'static str = "jobs";

    fn key(&self) -> Self::Key {
        self.job_id.clone()
    }

    fn same_content(&self, other: &Self) -> bool {
        self.job_id == other.job_id
            && self.user == other.user
            && self.partition == other.partition
            && self.status == other.status
            && self.time_limit == other.time_limit
            && self.start_time == other.start_time
            && self.submit_time == other.submit_time
    }
}

impl Row for NodePartition {
    type Key = (NodeName, PartitionName);
    const TABLE: &'static str = "node_partitions";

    fn key(&self) -> Self::Key {
        (self.node.clone(), self.partition.clone())
    }
}

impl Row for NodeResource {
    type Key = (NodeName, ResourceKind);
    const TABLE: &'static str = "node_resources";

    fn key(&self) -> Self::Key {
        (self.node.clone(), self.kind.clone())
    }
}

impl Row for JobResource {
    type Key = (JobId, ResourceKind);
    const TABLE: &'static str = "job_resources";

    fn key(&self) -> Self::Key {
        (self.job.clone(), self.kind.clone())
    }
}

impl Row for Allocation {
    type Key = (JobId, NodeName, ResourceKind);
    const TABLE: &'static str = "job_allocations";

    fn key(&self) -> Self::Key {
        (self.job.clone(), self.node.clone(), self.kind.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn node(updated_at: DateTime<Utc>) -> Node {
        Node {
            name: NodeName::new("n1").unwrap(),
            status: NodeStatus::Idle,
            cpus: 8,
            memory_mb: 32_000,
            updated_at,
        }
    }

    #[test]
    fn test_same_content_ignores_timestamp() {
        let a = node(ts(100));
        let b = node(ts(200));
        assert_ne!(a, b);
        assert!(a.same_content(&b));
    }

    #[test]
    fn test_same_content_detects_field_change() {
        let a = node(ts(100));
        let mut b = node(ts(100));
        b.status = NodeStatus::Mixed;
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_relation_keys() {
        let alloc = Allocation {
            job: JobId::new("42").unwrap(),
            node: NodeName::new("n1").unwrap(),
            kind: ResourceKind::cpu(),
            used: 4,
        };
        let (job, node, kind) = alloc.key();
        assert_eq!(job.as_str(), "42");
        assert_eq!(node.as_str(), "n1");
        assert!(kind.is_cpu());
        assert_eq!(Allocation::TABLE, "job_allocations");
    }

    #[test]
    fn test_job_optional_fields_default() {
        let json = r#"{
            "job_id": "1001",
            "user": "alice",
            "partition": "gpu",
            "status": "pending",
            "submit_time": "2026-10-01T12:00:00Z",
            "updated_at": "2026-10-01T12:00:00Z"
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.time_limit.is_none());
        assert!(job.start_time.is_none());
    }

    #[test]
    fn test_node_with_unrecognized_state_parses() {
        let json = r#"{
            "name": "n1",
            "status": "drained",
            "cpus": 64,
            "memory_mb": 256000,
            "updated_at": "2026-10-01T12:00:00Z"
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.status, NodeStatus::Unknown);
        assert_eq!(node.cpus, 64);
    }
}
