//! Resource ledger: per-node capacity and per-job request/allocation rows.
//!
//! Reads are public. Writes are crate-private and only issued from inside a
//! reconciliation transaction, so the `available <= total` and
//! `allocated <= requested` invariants cannot be bypassed.

use clusterboard_model::{JobId, JobResource, JobStatus, NodeName, NodeResource, ResourceKind};

use crate::error::{LedgerViolation, ReconcileError};
use crate::table::Table;

/// Per-node and per-job resource rows keyed by (owner, resource kind).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLedger {
    node_resources: Table<NodeResource>,
    job_resources: Table<JobResource>,
}

impl ResourceLedger {
    pub fn node_resources(&self) -> &Table<NodeResource> {
        &self.node_resources
    }

    pub fn job_resources(&self) -> &Table<JobResource> {
        &self.job_resources
    }

    pub fn node_resource(&self, node: &NodeName, kind: &ResourceKind) -> Option<&NodeResource> {
        self.node_resources.get(&(node.clone(), kind.clone()))
    }

    pub fn job_resource(&self, job: &JobId, kind: &ResourceKind) -> Option<&JobResource> {
        self.job_resources.get(&(job.clone(), kind.clone()))
    }

    /// All resource rows of a node, in kind order.
    pub fn resources_of_node<'a>(&'a self, node: &'a NodeName) -> impl Iterator<Item = &'a NodeResource> {
        self.node_resources.iter().filter(move |r| &r.node == node)
    }

    /// All resource rows of a job, in kind order.
    pub fn resources_of_job<'a>(&'a self, job: &'a JobId) -> impl Iterator<Item = &'a JobResource> {
        self.job_resources.iter().filter(move |r| &r.job == job)
    }

    /// Write node resource rows, enforcing `available <= total`.
    pub(crate) fn replace_node_resources<'a, I>(&mut self, rows: I) -> Result<(), ReconcileError>
    where
        I: IntoIterator<Item = &'a NodeResource>,
    {
        for row in rows {
            if row.available > row.total {
                return Err(ReconcileError::LedgerInvariantViolation(
                    LedgerViolation::AvailableExceedsTotal {
                        node: row.node.clone(),
                        kind: row.kind.clone(),
                        available: row.available,
                        total: row.total,
                    },
                ));
            }
            self.node_resources.upsert(row.clone());
        }
        Ok(())
    }

    /// Write job resource rows, enforcing the allocation policy of the
    /// owning job's status. `status_of` returns `None` for unknown jobs.
    pub(crate) fn replace_job_resources<'a, I, F>(
        &mut self,
        rows: I,
        status_of: F,
    ) -> Result<(), ReconcileError>
    where
        I: IntoIterator<Item = &'a JobResource>,
        F: Fn(&JobId) -> Option<JobStatus>,
    {
        for row in rows {
            let status = status_of(&row.job).ok_or_else(|| {
                ReconcileError::LedgerInvariantViolation(LedgerViolation::OrphanJobResource {
                    job: row.job.clone(),
                    kind: row.kind.clone(),
                })
            })?;
            check_job_resource(row, status)?;
            self.job_resources.upsert(row.clone());
        }
        Ok(())
    }

    /// Re-check every resource row of a job against a (possibly new) status.
    pub(crate) fn verify_job(&self, job: &JobId, status: JobStatus) -> Result<(), ReconcileError> {
        self.resources_of_job(job)
            .try_for_each(|row| check_job_resource(row, status))
    }

    /// Check that every node resource row belongs to a known node.
    pub(crate) fn verify_node_owners<F>(&self, node_exists: F) -> Result<(), ReconcileError>
    where
        F: Fn(&NodeName) -> bool,
    {
        match self.node_resources.iter().find(|r| !node_exists(&r.node)) {
            Some(row) => Err(ReconcileError::LedgerInvariantViolation(
                LedgerViolation::OrphanNodeResource {
                    node: row.node.clone(),
                    kind: row.kind.clone(),
                },
            )),
            None => Ok(()),
        }
    }

    pub(crate) fn remove_node_resource(&mut self, key: &(NodeName, ResourceKind)) {
        self.node_resources.remove(key);
    }

    pub(crate) fn remove_job_resource(&mut self, key: &(JobId, ResourceKind)) {
        self.job_resources.remove(key);
    }

    /// Cascade: drop every resource row owned by a node.
    pub(crate) fn remove_node(&mut self, node: &NodeName) -> usize {
        self.node_resources.remove_where(|r| &r.node == node).len()
    }

    /// Cascade: drop every resource row owned by a job.
    pub(crate) fn remove_job(&mut self, job: &JobId) -> usize {
        self.job_resources.remove_where(|r| &r.job == job).len()
    }
}

fn check_job_resource(row: &JobResource, status: JobStatus) -> Result<(), ReconcileError> {
    if status.is_pending() && row.allocated > 0 {
        return Err(ReconcileError::LedgerInvariantViolation(
            LedgerViolation::PendingWithAllocation {
                job: row.job.clone(),
                kind: row.kind.clone(),
                allocated: row.allocated,
            },
        ));
    }
    if row.allocated > row.requested {
        return Err(ReconcileError::LedgerInvariantViolation(
            LedgerViolation::AllocatedExceedsRequested {
                job: row.job.clone(),
                kind: row.kind.clone(),
                allocated: row.allocated,
                requested: row.requested,
            },
        ));
    }
    Ok(())
}
