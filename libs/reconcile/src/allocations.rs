//! Allocation graph: the (job, node, resource kind) -> used relation.
//!
//! The graph keeps a running total of `used` per (node, kind) so capacity
//! checks and aggregate derivation do not rescan every allocation row.

use std::collections::{BTreeMap, BTreeSet};

use clusterboard_model::{Allocation, JobId, NodeName, ResourceKind};

use crate::error::ReconcileError;
use crate::table::Table;

/// Many-to-many linkage of jobs to the nodes they occupy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationGraph {
    rows: Table<Allocation>,
    used: BTreeMap<(NodeName, ResourceKind), u64>,
}

impl AllocationGraph {
    pub fn rows(&self) -> &Table<Allocation> {
        &self.rows
    }

    pub fn for_job<'a>(&'a self, job: &'a JobId) -> impl Iterator<Item = &'a Allocation> {
        self.rows.iter().filter(move |a| &a.job == job)
    }

    pub fn for_node<'a>(&'a self, node: &'a NodeName) -> impl Iterator<Item = &'a Allocation> {
        self.rows.iter().filter(move |a| &a.node == node)
    }

    /// Total used quantity of a resource kind on a node across all jobs.
    pub fn used_on(&self, node: &NodeName, kind: &ResourceKind) -> u64 {
        self.used
            .get(&(node.clone(), kind.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Per-(node, kind) totals, in key order.
    pub fn totals(&self) -> impl Iterator<Item = (&(NodeName, ResourceKind), u64)> {
        self.used.iter().map(|(key, used)| (key, *used))
    }

    /// Write a batch of allocation rows and verify node capacity.
    ///
    /// Capacity is checked for every (node, kind) pair the batch touches and
    /// for every pair on `recheck_nodes`, whose capacity may have changed.
    /// `capacity` returns the node's total for a resource kind.
    pub(crate) fn write<'a, I, F>(
        &mut self,
        rows: I,
        recheck_nodes: &BTreeSet<NodeName>,
        capacity: F,
    ) -> Result<(), ReconcileError>
    where
        I: IntoIterator<Item = &'a Allocation>,
        F: Fn(&NodeName, &ResourceKind) -> u64,
    {
        let mut affected = BTreeSet::new();
        for row in rows {
            if let Some(previous) = self.rows.upsert(row.clone()) {
                self.subtract(&previous);
            }
            self.add(row);
            affected.insert((row.node.clone(), row.kind.clone()));
        }

        affected.extend(
            self.used
                .keys()
                .filter(|(node, _)| recheck_nodes.contains(node))
                .cloned(),
        );

        for (node, kind) in affected {
            let used = self.used_on(&node, &kind);
            let limit = capacity(&node, &kind);
            if used > limit {
                return Err(ReconcileError::CapacityExceeded {
                    node,
                    kind,
                    used,
                    capacity: limit,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, key: &(JobId, NodeName, ResourceKind)) {
        if let Some(previous) = self.rows.remove(key) {
            self.subtract(&previous);
        }
    }

    /// Cascade: drop every allocation of a job.
    pub(crate) fn remove_job(&mut self, job: &JobId) -> usize {
        let removed = self.rows.remove_where(|a| &a.job == job);
        removed.iter().for_each(|a| self.subtract(a));
        removed.len()
    }

    /// Cascade: drop every allocation on a node.
    pub(crate) fn remove_node(&mut self, node: &NodeName) -> usize {
        let removed = self.rows.remove_where(|a| &a.node == node);
        removed.iter().for_each(|a| self.subtract(a));
        removed.len()
    }

    // Zero totals are never stored, so equal row sets give equal graphs.
    fn add(&mut self, row: &Allocation) {
        if row.used == 0 {
            return;
        }
        let total = self
            .used
            .entry((row.node.clone(), row.kind.clone()))
            .or_insert(0);
        *total = total.saturating_add(row.used);
    }

    fn subtract(&mut self, row: &Allocation) {
        let key = (row.node.clone(), row.kind.clone());
        if let Some(total) = self.used.get_mut(&key) {
            *total = total.saturating_sub(row.used);
            if *total == 0 {
                self.used.remove(&key);
            }
        }
    }
}
