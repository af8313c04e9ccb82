//! End-to-end reconciliation tests against an in-memory store.
//!
//! Covers the worked pending-to-running example, idempotence, atomicity on
//! rejection, aggregate recomputation and deletion cascades.

use std::sync::Arc;

use clusterboard_model::{JobStatus, NodeStatus, Snapshot};
use clusterboard_reconcile::{
    ClusterStore, LedgerViolation, NoopSink, ReconcileError, Reconciler, ReconcilerConfig,
    StateDigest, Version,
};
use clusterboard_testing::{
    job_id, node_name, partition_name, small_cluster, ts, RecordingSink, SnapshotBuilder,
};

fn reconciler() -> Reconciler {
    Reconciler::new(
        Arc::new(ClusterStore::new()),
        Arc::new(NoopSink),
        ReconcilerConfig::default(),
    )
}

fn pending_example() -> SnapshotBuilder {
    SnapshotBuilder::at(ts(100))
        .partition("batch")
        .node("n1", 8, 32_000)
        .member("n1", "batch")
        .job("j1", "batch", JobStatus::Pending)
        .job_resource("j1", "cpu", 4, 0)
}

#[tokio::test]
async fn test_pending_then_running_example() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();

    let outcome = reconciler.reconcile(pending_example().build()).await.unwrap();
    assert_eq!(outcome.version, Version::new(1));
    assert_eq!(outcome.summary.inserted(), 7);

    let j1 = job_id("j1");
    let resources = store.job_resources(&j1);
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].allocated, 0);

    let running = pending_example()
        .observed(ts(130))
        .job_status("j1", JobStatus::Running)
        .job_resource("j1", "cpu", 4, 4)
        .allocation("j1", "n1", "cpu", 4)
        .build();
    let outcome = reconciler.reconcile(running).await.unwrap();
    assert_eq!(outcome.version, Version::new(2));

    let n1 = store.node(&node_name("n1")).unwrap();
    assert_eq!(n1.usage.cpus_total, 8);
    assert_eq!(n1.usage.cpus_alloc, 4);
    assert_eq!(n1.usage.cpus_idle, 4);
    assert_eq!(store.job(&j1).unwrap().status, JobStatus::Running);
    assert_eq!(store.allocations_for_job(&j1).len(), 1);
    assert_eq!(store.allocations_for_node(&node_name("n1"))[0].used, 4);
}

#[tokio::test]
async fn test_identical_snapshot_is_idempotent() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();
    let snapshot = pending_example()
        .job_status("j1", JobStatus::Running)
        .job_resource("j1", "cpu", 4, 4)
        .allocation("j1", "n1", "cpu", 4)
        .build();

    let first = reconciler.reconcile(snapshot.clone()).await.unwrap();
    let state_after_first = store.snapshot();

    let second = reconciler.reconcile(snapshot).await.unwrap();
    let state_after_second = store.snapshot();

    assert_eq!(first.version, Version::new(1));
    assert_eq!(second.version, Version::new(2));
    assert!(second.summary.is_noop());
    assert_eq!(second.summary.touched(), 0);
    assert_eq!(state_after_first.state, state_after_second.state);
    assert_eq!(first.stamp.digest, second.stamp.digest);
}

#[tokio::test]
async fn test_refreshed_timestamps_are_not_churn() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();

    let first = reconciler.reconcile(pending_example().build()).await.unwrap();
    let refreshed = pending_example().observed(ts(160)).build();
    let second = reconciler.reconcile(refreshed).await.unwrap();

    assert!(second.summary.is_noop());
    // node, partition and job each had their timestamp refreshed
    assert_eq!(second.summary.touched(), 3);
    assert_eq!(first.stamp.digest, second.stamp.digest);
    assert_eq!(store.job(&job_id("j1")).unwrap().updated_at, ts(160));
    assert_eq!(store.version().observed_at, ts(160));
}

#[tokio::test]
async fn test_malformed_snapshot_leaves_store_untouched() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();
    reconciler.reconcile(pending_example().build()).await.unwrap();
    let before = store.snapshot();

    // Several valid updates, then one allocation for a job that does not exist.
    let bad = pending_example()
        .observed(ts(200))
        .node_status("n1", NodeStatus::Mixed)
        .node("n2", 4, 8_000)
        .member("n2", "batch")
        .allocation("ghost", "n1", "cpu", 1)
        .build();
    let err = reconciler.reconcile(bad).await.unwrap_err();
    assert!(matches!(err, ReconcileError::MalformedSnapshot(_)));

    let after = store.snapshot();
    assert_eq!(*before, *after);
    assert_eq!(store.version().version, Version::new(1));
    assert!(store.node(&node_name("n2")).is_none());
}

#[tokio::test]
async fn test_ledger_violation_aborts_transaction() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();
    reconciler.reconcile(pending_example().build()).await.unwrap();
    let before = store.snapshot();

    let over_allocated = pending_example()
        .observed(ts(200))
        .node("n2", 4, 8_000)
        .job_status("j1", JobStatus::Running)
        .job_resource("j1", "cpu", 4, 6)
        .build();
    let err = reconciler.reconcile(over_allocated).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::LedgerInvariantViolation(LedgerViolation::AllocatedExceedsRequested { .. })
    ));
    assert_eq!(*before, *store.snapshot());
}

#[tokio::test]
async fn test_capacity_exceeded_aborts_transaction() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();

    let crowded = small_cluster(ts(100))
        .job("a", "batch", JobStatus::Running)
        .job("b", "batch", JobStatus::Running)
        .job_resource("a", "cpu", 6, 6)
        .job_resource("b", "cpu", 6, 6)
        .allocation("a", "n1", "cpu", 6)
        .allocation("b", "n1", "cpu", 6)
        .build();
    let err = reconciler.reconcile(crowded).await.unwrap_err();
    match err {
        ReconcileError::CapacityExceeded {
            node,
            used,
            capacity,
            ..
        } => {
            assert_eq!(node.as_str(), "n1");
            assert_eq!(used, 12);
            assert_eq!(capacity, 8);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.version().version, Version::INITIAL);
    assert_eq!(store.snapshot().state.row_count(), 0);
}

#[tokio::test]
async fn test_shrinking_capacity_under_existing_allocation_is_rejected() {
    let reconciler = reconciler();
    let base = small_cluster(ts(100))
        .job("a", "batch", JobStatus::Running)
        .job_resource("a", "cpu", 6, 6)
        .allocation("a", "n1", "cpu", 6);
    reconciler.reconcile(base.clone().build()).await.unwrap();

    let shrunk = base.observed(ts(130)).node_resource("n1", "cpu", 4, 0).build();
    let err = reconciler.reconcile(shrunk).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::CapacityExceeded { used: 6, capacity: 4, .. }
    ));
}

#[tokio::test]
async fn test_partition_aggregates_follow_member_changes() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();
    let batch = partition_name("batch");

    let base = small_cluster(ts(100))
        .job("a", "batch", JobStatus::Running)
        .job_resource("a", "cpu", 8, 4)
        .job_resource("a", "mem", 16_000, 4_000)
        .allocation("a", "n1", "cpu", 4)
        .allocation("a", "n1", "mem", 4_000);
    reconciler.reconcile(base.clone().build()).await.unwrap();

    let summary = store.partition(&batch).unwrap().summary;
    assert_eq!(summary.node_count, 2);
    assert_eq!(summary.figures.cpus_total, 16);
    assert_eq!(summary.figures.cpus_alloc, 4);
    assert_eq!(summary.figures.cpus_idle, 12);
    assert_eq!(summary.figures.memory_alloc_mb, 4_000);
    assert_eq!(summary.figures.memory_free_mb, 60_000);

    // Grow the allocation on one member node.
    let grown = base
        .clone()
        .observed(ts(130))
        .job_resource("a", "cpu", 8, 7)
        .allocation("a", "n1", "cpu", 7)
        .build();
    reconciler.reconcile(grown).await.unwrap();
    let summary = store.partition(&batch).unwrap().summary;
    assert_eq!(summary.figures.cpus_alloc, 7);
    assert_eq!(summary.figures.cpus_idle, 9);

    // Drop n2 from the partition only; the node itself stays.
    let mut shrunk = base.observed(ts(160)).build();
    shrunk.node_partitions.retain(|m| m.node.as_str() != "n2");
    reconciler.reconcile(shrunk).await.unwrap();
    let summary = store.partition(&batch).unwrap().summary;
    assert_eq!(summary.node_count, 1);
    assert_eq!(summary.figures.cpus_total, 8);
    assert_eq!(summary.figures.cpus_alloc, 4);
    assert!(store.node(&node_name("n2")).is_some());
}

#[tokio::test]
async fn test_partition_totals_saturate_on_huge_nodes() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();
    let huge = u64::MAX / 2 + 1;

    let snapshot = SnapshotBuilder::at(ts(100))
        .partition("batch")
        .bare_node("n1", huge, 1)
        .bare_node("n2", huge, 1)
        .member("n1", "batch")
        .member("n2", "batch")
        .build();
    reconciler.reconcile(snapshot).await.unwrap();

    let summary = store.partition(&partition_name("batch")).unwrap().summary;
    assert_eq!(summary.node_count, 2);
    assert_eq!(summary.figures.cpus_total, u64::MAX);
    assert_eq!(summary.figures.cpus_idle, u64::MAX);
    assert_eq!(summary.figures.memory_total_mb, 2);
    assert_eq!(store.node(&node_name("n1")).unwrap().usage.cpus_total, huge);
}

#[tokio::test]
async fn test_removed_node_cascades() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();

    let base = small_cluster(ts(100))
        .job("a", "batch", JobStatus::Running)
        .job_resource("a", "cpu", 4, 4)
        .allocation("a", "n1", "cpu", 2)
        .allocation("a", "n2", "cpu", 2);
    reconciler.reconcile(base.clone().build()).await.unwrap();
    let n2 = node_name("n2");
    assert_eq!(store.node_resources(&n2).len(), 2);
    assert_eq!(store.allocations_for_node(&n2).len(), 1);

    let outcome = reconciler
        .reconcile(base.observed(ts(130)).without_node("n2").build())
        .await
        .unwrap();
    assert_eq!(outcome.summary.nodes.deleted, 1);
    assert!(store.node(&n2).is_none());
    assert!(store.node_resources(&n2).is_empty());
    assert!(store.allocations_for_node(&n2).is_empty());
    assert!(store.partitions_of(&n2).is_empty());
    assert_eq!(store.allocations_for_job(&job_id("a")).len(), 1);
    assert_eq!(
        store.partition(&partition_name("batch")).unwrap().summary.node_count,
        1
    );
}

#[tokio::test]
async fn test_retired_job_cascades() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();

    let base = small_cluster(ts(100))
        .job("a", "batch", JobStatus::Running)
        .job_resource("a", "cpu", 4, 4)
        .allocation("a", "n1", "cpu", 4);
    reconciler.reconcile(base.clone().build()).await.unwrap();

    reconciler
        .reconcile(base.observed(ts(130)).without_job("a").build())
        .await
        .unwrap();
    let a = job_id("a");
    assert!(store.job(&a).is_none());
    assert!(store.job_resources(&a).is_empty());
    assert!(store.allocations_for_job(&a).is_empty());
    assert_eq!(store.node(&node_name("n1")).unwrap().usage.cpus_idle, 8);
}

#[tokio::test]
async fn test_empty_snapshot_retires_everything() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();
    reconciler.reconcile(pending_example().build()).await.unwrap();

    let outcome = reconciler.reconcile(Snapshot::empty(ts(200))).await.unwrap();
    assert_eq!(outcome.summary.deleted(), 7);
    assert_eq!(store.snapshot().state.row_count(), 0);
    assert!(store.snapshot().state.partition_summaries().is_empty());
}

#[tokio::test]
async fn test_digest_matches_committed_state() {
    let reconciler = reconciler();
    let store = reconciler.store().clone();
    reconciler.reconcile(pending_example().build()).await.unwrap();

    let committed = store.snapshot();
    assert_eq!(committed.stamp.digest, StateDigest::of(&committed.state).unwrap());
}

#[tokio::test]
async fn test_sink_sees_every_commit() {
    let sink = Arc::new(RecordingSink::default());
    let reconciler = Reconciler::new(
        Arc::new(ClusterStore::new()),
        sink.clone(),
        ReconcilerConfig::default(),
    );

    reconciler.reconcile(pending_example().build()).await.unwrap();
    reconciler
        .reconcile(pending_example().observed(ts(130)).build())
        .await
        .unwrap();

    let commits = sink.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].stamp.version, Version::new(1));
    assert_eq!(commits[0].rows, 7);
    assert!(commits[1].summary.is_noop());
}

#[tokio::test]
async fn test_restore_publishes_stored_stamp() {
    let source = reconciler();
    let outcome = source.reconcile(pending_example().build()).await.unwrap();
    let rows = source.store().snapshot().state.to_snapshot(ts(100));

    let restored = reconciler();
    restored.restore(rows, outcome.stamp.clone()).unwrap();
    assert_eq!(restored.store().version(), outcome.stamp);
    assert_eq!(
        restored.store().snapshot().state,
        source.store().snapshot().state
    );

    let next = restored
        .reconcile(pending_example().observed(ts(130)).build())
        .await
        .unwrap();
    assert_eq!(next.version, Version::new(2));
}
