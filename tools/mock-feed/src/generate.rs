//! Synthetic cluster generator.
//!
//! Produces snapshots that always pass validation: every allocation fits
//! the remaining capacity of its node, and jobs that cannot be placed stay
//! pending.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clusterboard_model::{
    Allocation, Job, JobId, JobResource, JobStatus, Node, NodeName, NodePartition, NodeResource,
    NodeStatus, Partition, PartitionName, PartitionStatus, ResourceKind, Snapshot,
};
use rand::Rng;

const NODE_CPUS: u64 = 64;
const NODE_MEMORY_MB: u64 = 256_000;
const NODE_GPUS: u64 = 4;
const FIRST_JOB_ID: u64 = 1001;

const NODE_STATES: [NodeStatus; 4] = [
    NodeStatus::Idle,
    NodeStatus::Mixed,
    NodeStatus::Allocated,
    NodeStatus::Down,
];

/// How big a cluster to make up.
#[derive(Debug, Clone, Copy)]
pub struct Shape {
    pub nodes: u32,
    pub jobs: u32,
}

/// Generate one snapshot observed at `now`.
pub fn snapshot<R: Rng>(rng: &mut R, shape: Shape, now: DateTime<Utc>) -> Result<Snapshot> {
    let mut snapshot = Snapshot::empty(now);

    let standard = PartitionName::new("standard")?;
    let gpu = PartitionName::new("gpu")?;
    for name in [&standard, &gpu] {
        snapshot.partitions.push(Partition {
            name: name.clone(),
            status: PartitionStatus::Up,
            qos: Some("normal".to_string()),
            allow_qos: vec!["normal".to_string(), "high".to_string()],
            updated_at: now,
        });
    }

    // Remaining capacity per node and kind, drawn down as jobs are placed.
    let mut free: BTreeMap<(NodeName, ResourceKind), u64> = BTreeMap::new();
    let mut members: BTreeMap<PartitionName, Vec<NodeName>> = BTreeMap::new();

    for i in 1..=shape.nodes {
        let name = NodeName::new(format!("node{i:02}"))?;
        snapshot.nodes.push(Node {
            name: name.clone(),
            status: NODE_STATES[rng.random_range(0..NODE_STATES.len())],
            cpus: NODE_CPUS,
            memory_mb: NODE_MEMORY_MB,
            updated_at: now,
        });

        let mut kinds = vec![
            (ResourceKind::cpu(), NODE_CPUS),
            (ResourceKind::memory(), NODE_MEMORY_MB),
        ];
        let mut partitions = vec![standard.clone()];
        if i % 2 == 0 {
            kinds.push((ResourceKind::gpu(), NODE_GPUS));
            partitions.push(gpu.clone());
        }
        for (kind, total) in kinds {
            free.insert((name.clone(), kind), total);
        }
        for partition in partitions {
            snapshot.node_partitions.push(NodePartition {
                node: name.clone(),
                partition: partition.clone(),
            });
            members.entry(partition).or_default().push(name.clone());
        }
    }

    for i in 0..u64::from(shape.jobs) {
        let job_id = JobId::new((FIRST_JOB_ID + i).to_string())?;
        let partition = if rng.random_bool(0.3) && members.contains_key(&gpu) {
            gpu.clone()
        } else {
            standard.clone()
        };

        let mut request = vec![
            (ResourceKind::cpu(), rng.random_range(1..=32)),
            (ResourceKind::memory(), rng.random_range(1..=64) * 1_000),
        ];
        if partition == gpu {
            request.push((ResourceKind::gpu(), rng.random_range(1..=2)));
        }

        let mut status = match rng.random_range(0..3) {
            0 => JobStatus::Pending,
            1 => JobStatus::Running,
            _ => JobStatus::Completed,
        };

        let placement = if status == JobStatus::Running {
            let candidates = members.get(&partition).map(Vec::as_slice).unwrap_or(&[]);
            let placed = place(rng, candidates, &request, &mut free);
            if placed.is_none() {
                status = JobStatus::Pending;
            }
            placed
        } else {
            None
        };

        let submit_time = now - Duration::minutes(rng.random_range(5..600));
        snapshot.jobs.push(Job {
            job_id: job_id.clone(),
            user: format!("user{}", rng.random_range(1..5)),
            partition,
            status,
            time_limit: Some("12:00:00".to_string()),
            start_time: (status != JobStatus::Pending)
                .then(|| submit_time + Duration::minutes(rng.random_range(1..5))),
            submit_time,
            updated_at: now,
        });

        for (kind, requested) in &request {
            snapshot.job_resources.push(JobResource {
                job: job_id.clone(),
                kind: kind.clone(),
                requested: *requested,
                allocated: if placement.is_some() { *requested } else { 0 },
            });
        }

        if let Some(node) = placement {
            for (kind, used) in request {
                snapshot.allocations.push(Allocation {
                    job: job_id.clone(),
                    node: node.clone(),
                    kind,
                    used,
                });
            }
        }
    }

    snapshot.node_resources = free
        .into_iter()
        .map(|((node, kind), available)| {
            let total = if kind.is_cpu() {
                NODE_CPUS
            } else if kind.is_memory() {
                NODE_MEMORY_MB
            } else {
                NODE_GPUS
            };
            NodeResource {
                node,
                kind,
                total,
                available,
            }
        })
        .collect();

    Ok(snapshot)
}

/// Pick a node with room for the whole request and reserve it there.
fn place<R: Rng>(
    rng: &mut R,
    candidates: &[NodeName],
    request: &[(ResourceKind, u64)],
    free: &mut BTreeMap<(NodeName, ResourceKind), u64>,
) -> Option<NodeName> {
    if candidates.is_empty() {
        return None;
    }
    let start = rng.random_range(0..candidates.len());
    let node = (0..candidates.len())
        .map(|offset| &candidates[(start + offset) % candidates.len()])
        .find(|node| {
            request.iter().all(|(kind, amount)| {
                free.get(&((*node).clone(), kind.clone()))
                    .is_some_and(|left| left >= amount)
            })
        })?
        .clone();

    for (kind, amount) in request {
        if let Some(left) = free.get_mut(&(node.clone(), kind.clone())) {
            *left -= amount;
        }
    }
    Some(node)
}
