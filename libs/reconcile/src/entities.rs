//! Entity store: current-state records for nodes, partitions and jobs,
//! plus the node-to-partition membership relation.

use clusterboard_model::{Job, JobId, Node, NodeName, NodePartition, Partition, PartitionName};

use crate::table::Table;

/// Current-state records for nodes, partitions, jobs and memberships.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStore {
    nodes: Table<Node>,
    partitions: Table<Partition>,
    jobs: Table<Job>,
    memberships: Table<NodePartition>,
}

impl EntityStore {
    pub fn nodes(&self) -> &Table<Node> {
        &self.nodes
    }

    pub fn partitions(&self) -> &Table<Partition> {
        &self.partitions
    }

    pub fn jobs(&self) -> &Table<Job> {
        &self.jobs
    }

    pub fn memberships(&self) -> &Table<NodePartition> {
        &self.memberships
    }

    pub fn node(&self, name: &NodeName) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn partition(&self, name: &PartitionName) -> Option<&Partition> {
        self.partitions.get(name)
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Partitions a node belongs to, in name order.
    pub fn partitions_of<'a>(&'a self, node: &'a NodeName) -> impl Iterator<Item = &'a PartitionName> {
        self.memberships
            .iter()
            .filter(move |m| &m.node == node)
            .map(|m| &m.partition)
    }

    /// Member nodes of a partition, in name order.
    pub fn members_of<'a>(&'a self, partition: &'a PartitionName) -> impl Iterator<Item = &'a NodeName> {
        self.memberships
            .iter()
            .filter(move |m| &m.partition == partition)
            .map(|m| &m.node)
    }

    pub(crate) fn put_node(&mut self, node: Node) {
        self.nodes.upsert(node);
    }

    pub(crate) fn put_partition(&mut self, partition: Partition) {
        self.partitions.upsert(partition);
    }

    pub(crate) fn put_job(&mut self, job: Job) {
        self.jobs.upsert(job);
    }

    pub(crate) fn put_membership(&mut self, membership: NodePartition) {
        self.memberships.upsert(membership);
    }

    pub(crate) fn remove_membership(&mut self, key: &(NodeName, PartitionName)) {
        self.memberships.remove(key);
    }

    pub(crate) fn remove_job(&mut self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id)
    }

    /// Remove a node together with its memberships.
    pub(crate) fn remove_node(&mut self, name: &NodeName) -> Option<Node> {
        self.memberships.remove_where(|m| &m.node == name);
        self.nodes.remove(name)
    }

    /// Remove a partition together with its memberships.
    pub(crate) fn remove_partition(&mut self, name: &PartitionName) -> Option<Partition> {
        self.memberships.remove_where(|m| &m.partition == name);
        self.partitions.remove(name)
    }
}
