//! Test support for the cluster state layer.
//!
//! - [`SnapshotBuilder`] assembles snapshots from short string keys
//! - [`RecordingSink`], [`FailingSink`], [`GatedSink`] and [`StallingSink`]
//!   stand in for the durable mirror so tests can observe or stall a commit
//!
//! Fixture helpers panic on invalid input; they are for tests only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clusterboard_model::{
    Allocation, Job, JobId, JobResource, JobStatus, Node, NodeName, NodePartition, NodeResource,
    NodeStatus, Partition, PartitionName, PartitionStatus, ResourceKind, Snapshot,
};
use clusterboard_reconcile::{ChangeSummary, Commit, CommitSink, SinkError, Stamp};
use tokio::sync::Notify;

/// A fixed instant `secs` seconds after the Unix epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .expect("timestamp in range")
}

pub fn node_name(name: &str) -> NodeName {
    NodeName::new(name).expect("valid node name")
}

pub fn partition_name(name: &str) -> PartitionName {
    PartitionName::new(name).expect("valid partition name")
}

pub fn job_id(id: &str) -> JobId {
    JobId::new(id).expect("valid job id")
}

pub fn kind(kind: &str) -> ResourceKind {
    ResourceKind::new(kind).expect("valid resource kind")
}

/// Fluent builder for [`Snapshot`] fixtures.
///
/// Every row is stamped with the builder's observation time.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
}

impl SnapshotBuilder {
    pub fn at(observed_at: DateTime<Utc>) -> Self {
        Self {
            snapshot: Snapshot::empty(observed_at),
        }
    }

    /// Re-stamp the snapshot and every entity with a new observation time.
    pub fn observed(mut self, observed_at: DateTime<Utc>) -> Self {
        self.snapshot.observed_at = observed_at;
        self.snapshot
            .nodes
            .iter_mut()
            .for_each(|n| n.updated_at = observed_at);
        self.snapshot
            .partitions
            .iter_mut()
            .for_each(|p| p.updated_at = observed_at);
        self.snapshot
            .jobs
            .iter_mut()
            .for_each(|j| j.updated_at = observed_at);
        self
    }

    pub fn partition(mut self, name: &str) -> Self {
        self.snapshot.partitions.push(Partition {
            name: partition_name(name),
            status: PartitionStatus::Up,
            qos: None,
            allow_qos: Vec::new(),
            updated_at: self.snapshot.observed_at,
        });
        self
    }

    /// Add a node with CPU and memory totals, plus matching resource rows.
    pub fn node(mut self, name: &str, cpus: u64, memory_mb: u64) -> Self {
        self.snapshot.nodes.push(Node {
            name: node_name(name),
            status: NodeStatus::Idle,
            cpus,
            memory_mb,
            updated_at: self.snapshot.observed_at,
        });
        self.node_resource(name, ResourceKind::CPU, cpus, cpus)
            .node_resource(name, ResourceKind::MEMORY, memory_mb, memory_mb)
    }

    /// Add a node without any resource rows.
    pub fn bare_node(mut self, name: &str, cpus: u64, memory_mb: u64) -> Self {
        self.snapshot.nodes.push(Node {
            name: node_name(name),
            status: NodeStatus::Idle,
            cpus,
            memory_mb,
            updated_at: self.snapshot.observed_at,
        });
        self
    }

    pub fn node_status(mut self, name: &str, status: NodeStatus) -> Self {
        let name = node_name(name);
        self.snapshot
            .nodes
            .iter_mut()
            .filter(|n| n.name == name)
            .for_each(|n| n.status = status);
        self
    }

    pub fn member(mut self, node: &str, partition: &str) -> Self {
        self.snapshot.node_partitions.push(NodePartition {
            node: node_name(node),
            partition: partition_name(partition),
        });
        self
    }

    /// Add or replace a node resource row.
    pub fn node_resource(mut self, node: &str, resource: &str, total: u64, available: u64) -> Self {
        let row = NodeResource {
            node: node_name(node),
            kind: kind(resource),
            total,
            available,
        };
        self.snapshot
            .node_resources
            .retain(|r| !(r.node == row.node && r.kind == row.kind));
        self.snapshot.node_resources.push(row);
        self
    }

    pub fn job(mut self, id: &str, partition: &str, status: JobStatus) -> Self {
        self.snapshot.jobs.push(Job {
            job_id: job_id(id),
            user: "alice".to_string(),
            partition: partition_name(partition),
            status,
            time_limit: Some("01:00:00".to_string()),
            start_time: None,
            submit_time: self.snapshot.observed_at,
            updated_at: self.snapshot.observed_at,
        });
        self
    }

    pub fn job_status(mut self, id: &str, status: JobStatus) -> Self {
        let id = job_id(id);
        self.snapshot
            .jobs
            .iter_mut()
            .filter(|j| j.job_id == id)
            .for_each(|j| j.status = status);
        self
    }

    /// Add or replace a job resource row.
    pub fn job_resource(mut self, id: &str, resource: &str, requested: u64, allocated: u64) -> Self {
        let row = JobResource {
            job: job_id(id),
            kind: kind(resource),
            requested,
            allocated,
        };
        self.snapshot
            .job_resources
            .retain(|r| !(r.job == row.job && r.kind == row.kind));
        self.snapshot.job_resources.push(row);
        self
    }

    /// Add or replace an allocation row.
    pub fn allocation(mut self, job: &str, node: &str, resource: &str, used: u64) -> Self {
        let row = Allocation {
            job: job_id(job),
            node: node_name(node),
            kind: kind(resource),
            used,
        };
        self.snapshot
            .allocations
            .retain(|a| !(a.job == row.job && a.node == row.node && a.kind == row.kind));
        self.snapshot.allocations.push(row);
        self
    }

    /// Drop a node and every row that references it.
    pub fn without_node(mut self, name: &str) -> Self {
        let name = node_name(name);
        self.snapshot.nodes.retain(|n| n.name != name);
        self.snapshot.node_partitions.retain(|m| m.node != name);
        self.snapshot.node_resources.retain(|r| r.node != name);
        self.snapshot.allocations.retain(|a| a.node != name);
        self
    }

    /// Drop a job and every row that references it.
    pub fn without_job(mut self, id: &str) -> Self {
        let id = job_id(id);
        self.snapshot.jobs.retain(|j| j.job_id != id);
        self.snapshot.job_resources.retain(|r| r.job != id);
        self.snapshot.allocations.retain(|a| a.job != id);
        self
    }

    pub fn build(self) -> Snapshot {
        self.snapshot
    }
}

/// A two-node cluster with one partition and no jobs.
pub fn small_cluster(observed_at: DateTime<Utc>) -> SnapshotBuilder {
    SnapshotBuilder::at(observed_at)
        .partition("batch")
        .node("n1", 8, 32_000)
        .node("n2", 8, 32_000)
        .member("n1", "batch")
        .member("n2", "batch")
}

/// What a [`RecordingSink`] saw for one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub stamp: Stamp,
    pub summary: ChangeSummary,
    pub rows: usize,
    pub resync: bool,
}

/// Sink that records every commit it accepts.
#[derive(Debug, Default)]
pub struct RecordingSink {
    commits: Mutex<Vec<RecordedCommit>>,
}

impl RecordingSink {
    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.commits.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommitSink for RecordingSink {
    async fn persist(&self, commit: Commit<'_>) -> Result<(), SinkError> {
        let recorded = RecordedCommit {
            stamp: commit.stamp.clone(),
            summary: commit.changes.summary(),
            rows: commit.state.row_count(),
            resync: commit.resync,
        };
        self.commits
            .lock()
            .map_err(|e| SinkError::Write(e.to_string()))?
            .push(recorded);
        Ok(())
    }
}

/// Sink that rejects every commit.
#[derive(Debug, Clone, Default)]
pub struct FailingSink {
    pub message: String,
}

#[async_trait]
impl CommitSink for FailingSink {
    async fn persist(&self, _commit: Commit<'_>) -> Result<(), SinkError> {
        Err(SinkError::Unavailable(self.message.clone()))
    }
}

/// Sink that parks every commit until released.
///
/// `entered` is notified when a commit reaches the sink; the commit then
/// waits for `release`. Lets a test read the store while a reconciliation
/// is in flight.
#[derive(Debug, Default)]
pub struct GatedSink {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommitSink for GatedSink {
    async fn persist(&self, _commit: Commit<'_>) -> Result<(), SinkError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

/// Sink that stores one chosen commit but acknowledges it late.
///
/// The commit numbered `stall_on` (counting from zero) is recorded, then
/// held for `stall` before returning, like a database that committed while
/// the caller had already given up.
#[derive(Debug)]
pub struct StallingSink {
    recorder: RecordingSink,
    stall: Duration,
    stall_on: usize,
    seen: AtomicUsize,
}

impl StallingSink {
    pub fn new(stall_on: usize, stall: Duration) -> Self {
        Self {
            recorder: RecordingSink::default(),
            stall,
            stall_on,
            seen: AtomicUsize::new(0),
        }
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.recorder.commits()
    }
}

#[async_trait]
impl CommitSink for StallingSink {
    async fn persist(&self, commit: Commit<'_>) -> Result<(), SinkError> {
        self.recorder.persist(commit).await?;
        if self.seen.fetch_add(1, Ordering::SeqCst) == self.stall_on {
            tokio::time::sleep(self.stall).await;
        }
        Ok(())
    }
}
