//! Property tests for the node capacity and allocation invariants.

use std::sync::Arc;

use clusterboard_model::JobStatus;
use clusterboard_reconcile::{ClusterStore, NoopSink, ReconcileError, Reconciler, ReconcilerConfig};
use clusterboard_testing::{small_cluster, ts};
use proptest::prelude::*;

const NODES: [&str; 2] = ["n1", "n2"];
const JOBS: [&str; 4] = ["j0", "j1", "j2", "j3"];

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn committed_state_never_exceeds_capacity(
        rounds in prop::collection::vec(
            prop::collection::vec((0usize..JOBS.len(), 0usize..NODES.len(), 0u64..6), 0..8),
            1..4,
        )
    ) {
        let rt = runtime();
        let store = Arc::new(ClusterStore::new());
        let reconciler = Reconciler::new(store.clone(), Arc::new(NoopSink), ReconcilerConfig::default());

        for (round, allocations) in rounds.into_iter().enumerate() {
            let mut builder = small_cluster(ts(100 + round as i64));
            for job in JOBS {
                builder = builder
                    .job(job, "batch", JobStatus::Running)
                    .job_resource(job, "cpu", 64, 0);
            }
            for (job, node, used) in allocations {
                builder = builder.allocation(JOBS[job], NODES[node], "cpu", used);
            }

            let before = store.snapshot();
            match rt.block_on(reconciler.reconcile(builder.build())) {
                Ok(_) => {}
                Err(ReconcileError::CapacityExceeded { used, capacity, .. }) => {
                    prop_assert!(used > capacity);
                    let after = store.snapshot();
                    prop_assert_eq!(&*before, &*after);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }

            let committed = store.snapshot();
            for ((node, kind), used) in committed.state.allocations().totals() {
                prop_assert!(used <= committed.state.capacity(node, kind));
            }
            for figures in committed.state.node_usages().values() {
                prop_assert_eq!(figures.cpus_alloc + figures.cpus_idle, figures.cpus_total);
            }
        }
    }

    #[test]
    fn partition_summary_is_sum_of_members(
        used in prop::collection::vec((0usize..NODES.len(), 0u64..3), 0..5)
    ) {
        let rt = runtime();
        let store = Arc::new(ClusterStore::new());
        let reconciler = Reconciler::new(store.clone(), Arc::new(NoopSink), ReconcilerConfig::default());

        let mut builder = small_cluster(ts(100));
        for (i, (node, amount)) in used.iter().enumerate() {
            let job = format!("j{i}");
            builder = builder
                .job(&job, "batch", JobStatus::Running)
                .job_resource(&job, "cpu", 4, *amount)
                .allocation(&job, NODES[*node], "cpu", *amount);
        }
        rt.block_on(reconciler.reconcile(builder.build())).unwrap();

        let committed = store.snapshot();
        let state = &committed.state;
        for (name, summary) in state.partition_summaries() {
            let members: Vec<_> = state.entities().members_of(name).collect();
            let alloc: u64 = members
                .iter()
                .filter_map(|n| state.node_usage(n))
                .map(|f| f.cpus_alloc)
                .sum();
            prop_assert_eq!(summary.node_count, members.len() as u64);
            prop_assert_eq!(summary.figures.cpus_alloc, alloc);
        }
    }
}
