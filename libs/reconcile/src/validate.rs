//! Pre-commit snapshot validation.
//!
//! Validation looks only at the snapshot itself. It collects every defect
//! instead of stopping at the first one so an operator can fix a broken feed
//! in one pass.

use std::collections::{BTreeMap, BTreeSet};

use clusterboard_model::{JobId, JobStatus, NodeName, PartitionName, Row, Snapshot};

use crate::error::{ReconcileError, SnapshotDefect};

/// Validate a snapshot, returning every defect found.
pub fn validate(snapshot: &Snapshot) -> Result<(), ReconcileError> {
    let defects = find_defects(snapshot);
    if defects.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::MalformedSnapshot(defects))
    }
}

/// Collect the defects of a snapshot, in table order.
pub fn find_defects(snapshot: &Snapshot) -> Vec<SnapshotDefect> {
    let mut defects = Vec::new();

    check_unique(&snapshot.nodes, |n| n.name.to_string(), &mut defects);
    check_unique(&snapshot.partitions, |p| p.name.to_string(), &mut defects);
    check_unique(&snapshot.jobs, |j| j.job_id.to_string(), &mut defects);
    check_unique(
        &snapshot.node_partitions,
        |m| format!("{}/{}", m.node, m.partition),
        &mut defects,
    );
    check_unique(
        &snapshot.node_resources,
        |r| format!("{}/{}", r.node, r.kind),
        &mut defects,
    );
    check_unique(
        &snapshot.job_resources,
        |r| format!("{}/{}", r.job, r.kind),
        &mut defects,
    );
    check_unique(
        &snapshot.allocations,
        |a| format!("{}/{}/{}", a.job, a.node, a.kind),
        &mut defects,
    );

    let nodes: BTreeSet<&NodeName> = snapshot.nodes.iter().map(|n| &n.name).collect();
    let partitions: BTreeSet<&PartitionName> =
        snapshot.partitions.iter().map(|p| &p.name).collect();
    let jobs: BTreeMap<&JobId, JobStatus> = snapshot
        .jobs
        .iter()
        .map(|j| (&j.job_id, j.status))
        .collect();

    for membership in &snapshot.node_partitions {
        if !nodes.contains(&membership.node) {
            defects.push(SnapshotDefect::UnknownNode {
                table: "node_partitions",
                key: format!("{}/{}", membership.node, membership.partition),
                node: membership.node.clone(),
            });
        }
        if !partitions.contains(&membership.partition) {
            defects.push(SnapshotDefect::UnknownPartition {
                node: membership.node.clone(),
                partition: membership.partition.clone(),
            });
        }
    }

    for resource in &snapshot.node_resources {
        if !nodes.contains(&resource.node) {
            defects.push(SnapshotDefect::UnknownNode {
                table: "node_resources",
                key: format!("{}/{}", resource.node, resource.kind),
                node: resource.node.clone(),
            });
        }
        if resource.available > resource.total {
            defects.push(SnapshotDefect::AvailableExceedsTotal {
                node: resource.node.clone(),
                kind: resource.kind.clone(),
                available: resource.available,
                total: resource.total,
            });
        }
    }

    for resource in &snapshot.job_resources {
        let Some(status) = jobs.get(&resource.job).copied() else {
            defects.push(SnapshotDefect::UnknownJob {
                table: "job_resources",
                key: format!("{}/{}", resource.job, resource.kind),
                job: resource.job.clone(),
            });
            continue;
        };
        if status.is_pending() && resource.allocated > 0 {
            defects.push(SnapshotDefect::PendingWithAllocation {
                job: resource.job.clone(),
                kind: resource.kind.clone(),
                allocated: resource.allocated,
            });
        } else if resource.allocated > resource.requested && !status.may_hold_allocation() {
            // Running and Completed jobs are left to the ledger.
            defects.push(SnapshotDefect::AllocatedExceedsRequested {
                job: resource.job.clone(),
                status: status.as_str(),
                kind: resource.kind.clone(),
                allocated: resource.allocated,
                requested: resource.requested,
            });
        }
    }

    for allocation in &snapshot.allocations {
        let key = || format!("{}/{}/{}", allocation.job, allocation.node, allocation.kind);
        if !jobs.contains_key(&allocation.job) {
            defects.push(SnapshotDefect::UnknownJob {
                table: "job_allocations",
                key: key(),
                job: allocation.job.clone(),
            });
        }
        if !nodes.contains(&allocation.node) {
            defects.push(SnapshotDefect::UnknownNode {
                table: "job_allocations",
                key: key(),
                node: allocation.node.clone(),
            });
        }
    }

    defects
}

fn check_unique<R, F>(rows: &[R], label: F, defects: &mut Vec<SnapshotDefect>)
where
    R: Row,
    F: Fn(&R) -> String,
{
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    for row in rows {
        let key = row.key();
        if !seen.insert(key.clone()) && reported.insert(key) {
            defects.push(SnapshotDefect::DuplicateKey {
                table: R::TABLE,
                key: label(row),
            });
        }
    }
}
