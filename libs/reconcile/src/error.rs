//! Reconciliation error types.

use std::time::Duration;

use clusterboard_model::{JobId, NodeName, PartitionName, ResourceKind};
use thiserror::Error;

/// Reconciliation errors.
///
/// Every variant aborts the whole reconciliation; the previously committed
/// state stays the only visible state.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Structural or referential defects in the incoming snapshot.
    #[error("malformed snapshot: {}", format_defects(.0))]
    MalformedSnapshot(Vec<SnapshotDefect>),

    /// A resource ledger write broke `available <= total` or
    /// `allocated <= requested`.
    #[error("ledger invariant violated: {0}")]
    LedgerInvariantViolation(LedgerViolation),

    /// The allocations on a node exceed its capacity for a resource kind.
    #[error("capacity exceeded on node {node} for {kind}: used {used} > capacity {capacity}")]
    CapacityExceeded {
        node: NodeName,
        kind: ResourceKind,
        used: u64,
        capacity: u64,
    },

    /// Another reconciliation is in flight.
    #[error("a reconciliation is already in progress")]
    ReconciliationInProgress,

    /// The reconciliation did not finish within its time bound.
    #[error("reconciliation timed out after {0:?}")]
    ReconciliationTimeout(Duration),

    /// The commit could not be made durable.
    #[error("reconciliation failed: {0}")]
    ReconciliationFailed(String),
}

impl ReconcileError {
    /// Returns true if the caller should simply retry on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ReconciliationInProgress
                | Self::ReconciliationTimeout(_)
                | Self::ReconciliationFailed(_)
        )
    }

    /// Stable short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSnapshot(_) => "malformed_snapshot",
            Self::LedgerInvariantViolation(_) => "ledger_invariant_violation",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::ReconciliationInProgress => "reconciliation_in_progress",
            Self::ReconciliationTimeout(_) => "reconciliation_timeout",
            Self::ReconciliationFailed(_) => "reconciliation_failed",
        }
    }
}

/// A single defect found while validating a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotDefect {
    #[error("duplicate key {key} in {table}")]
    DuplicateKey { table: &'static str, key: String },

    #[error("{table} row {key} references unknown node {node}")]
    UnknownNode {
        table: &'static str,
        key: String,
        node: NodeName,
    },

    #[error("{table} row {key} references unknown job {job}")]
    UnknownJob {
        table: &'static str,
        key: String,
        job: JobId,
    },

    #[error("membership of node {node} references unknown partition {partition}")]
    UnknownPartition {
        node: NodeName,
        partition: PartitionName,
    },

    #[error("node {node} reports {available} available {kind} out of {total}")]
    AvailableExceedsTotal {
        node: NodeName,
        kind: ResourceKind,
        available: u64,
        total: u64,
    },

    #[error("job {job} ({status}) has {allocated} {kind} allocated but requested {requested}")]
    AllocatedExceedsRequested {
        job: JobId,
        status: &'static str,
        kind: ResourceKind,
        allocated: u64,
        requested: u64,
    },

    #[error("pending job {job} has {allocated} {kind} allocated")]
    PendingWithAllocation {
        job: JobId,
        kind: ResourceKind,
        allocated: u64,
    },
}

/// A ledger write that would break a resource invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerViolation {
    #[error("node {node} {kind}: available {available} > total {total}")]
    AvailableExceedsTotal {
        node: NodeName,
        kind: ResourceKind,
        available: u64,
        total: u64,
    },

    #[error("job {job} {kind}: allocated {allocated} > requested {requested}")]
    AllocatedExceedsRequested {
        job: JobId,
        kind: ResourceKind,
        allocated: u64,
        requested: u64,
    },

    #[error("job {job} {kind}: pending job has {allocated} allocated")]
    PendingWithAllocation {
        job: JobId,
        kind: ResourceKind,
        allocated: u64,
    },

    #[error("job {job} {kind}: resource row has no owning job")]
    OrphanJobResource { job: JobId, kind: ResourceKind },

    #[error("node {node} {kind}: resource row has no owning node")]
    OrphanNodeResource { node: NodeName, kind: ResourceKind },
}

fn format_defects(defects: &[SnapshotDefect]) -> String {
    const SHOWN: usize = 5;
    let mut parts: Vec<String> = defects.iter().take(SHOWN).map(|d| d.to_string()).collect();
    if defects.len() > SHOWN {
        parts.push(format!("and {} more", defects.len() - SHOWN));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message_truncates() {
        let defects: Vec<_> = (0..7)
            .map(|i| SnapshotDefect::DuplicateKey {
                table: "nodes",
                key: format!("n{i}"),
            })
            .collect();
        let message = ReconcileError::MalformedSnapshot(defects).to_string();
        assert!(message.contains("duplicate key n0 in nodes"));
        assert!(message.contains("and 2 more"));
        assert!(!message.contains("n6"));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ReconcileError::ReconciliationInProgress.is_transient());
        assert!(!ReconcileError::MalformedSnapshot(vec![]).is_transient());
        assert_eq!(
            ReconcileError::ReconciliationTimeout(Duration::from_secs(1)).kind(),
            "reconciliation_timeout"
        );
    }
}
