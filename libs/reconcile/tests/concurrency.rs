//! Single-writer, snapshot-isolated read and timeout behavior.

use std::sync::Arc;
use std::time::Duration;

use clusterboard_model::JobStatus;
use clusterboard_reconcile::{
    ClusterStore, ReconcileError, Reconciler, ReconcilerConfig, Stamp, StateDigest, Version,
};
use clusterboard_testing::{
    node_name, small_cluster, ts, FailingSink, GatedSink, RecordingSink, SnapshotBuilder,
    StallingSink,
};

fn running_on_n1(observed: i64, used: u64) -> SnapshotBuilder {
    small_cluster(ts(observed))
        .job("a", "batch", JobStatus::Running)
        .job_resource("a", "cpu", 8, used)
        .allocation("a", "n1", "cpu", used)
}

fn gated(timeout: Duration) -> (Arc<Reconciler>, Arc<GatedSink>) {
    let sink = Arc::new(GatedSink::new());
    let reconciler = Reconciler::new(
        Arc::new(ClusterStore::new()),
        sink.clone(),
        ReconcilerConfig { timeout },
    );
    (Arc::new(reconciler), sink)
}

#[tokio::test]
async fn test_reader_sees_previous_state_during_commit() {
    let (reconciler, sink) = gated(Duration::from_secs(5));
    let store = reconciler.store().clone();

    sink.release.notify_one();
    reconciler.reconcile(running_on_n1(100, 2).build()).await.unwrap();
    sink.entered.notified().await;

    let writer = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile(running_on_n1(130, 6).build()).await })
    };
    sink.entered.notified().await;

    // The commit is parked inside the sink: readers still see version 1 in full.
    let during = store.snapshot();
    assert_eq!(during.stamp.version, Version::new(1));
    assert_eq!(store.version().version, Version::new(1));
    assert_eq!(store.node(&node_name("n1")).unwrap().usage.cpus_alloc, 2);
    assert_eq!(during.stamp.digest, StateDigest::of(&during.state).unwrap());

    sink.release.notify_one();
    let outcome = writer.await.unwrap().unwrap();
    assert_eq!(outcome.version, Version::new(2));

    let after = store.snapshot();
    assert_eq!(after.stamp.version, Version::new(2));
    assert_eq!(store.node(&node_name("n1")).unwrap().usage.cpus_alloc, 6);
    assert_eq!(after.stamp.digest, StateDigest::of(&after.state).unwrap());

    // The earlier read is unaffected by the publish.
    assert_eq!(during.stamp.version, Version::new(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_never_see_a_mixture() {
    let (reconciler, sink) = gated(Duration::from_secs(5));
    let store = reconciler.store().clone();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let committed = store.snapshot();
                    let digest = StateDigest::of(&committed.state).unwrap();
                    if committed.stamp.version != Version::INITIAL {
                        assert_eq!(committed.stamp.digest, digest);
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for (i, used) in [1u64, 5, 3, 8, 0].into_iter().enumerate() {
        sink.release.notify_one();
        reconciler
            .reconcile(running_on_n1(100 + i as i64, used).build())
            .await
            .unwrap();
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(store.version().version, Version::new(5));
}

#[tokio::test]
async fn test_second_reconciliation_is_rejected_while_in_flight() {
    let (reconciler, sink) = gated(Duration::from_secs(5));

    let first = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile(running_on_n1(100, 2).build()).await })
    };
    sink.entered.notified().await;

    let err = reconciler
        .reconcile(running_on_n1(130, 4).build())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::ReconciliationInProgress));
    assert!(err.is_transient());

    sink.release.notify_one();
    assert_eq!(first.await.unwrap().unwrap().version, Version::new(1));
    assert_eq!(reconciler.store().version().version, Version::new(1));
}

#[tokio::test]
async fn test_timeout_leaves_state_intact() {
    let (reconciler, sink) = gated(Duration::from_millis(50));
    let store = reconciler.store().clone();

    let err = reconciler
        .reconcile(running_on_n1(100, 2).build())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::ReconciliationTimeout(_)));
    assert_eq!(store.version().version, Version::INITIAL);
    assert_eq!(store.snapshot().state.row_count(), 0);

    // The guard was released with the timed-out transaction.
    sink.release.notify_one();
    let outcome = reconciler
        .reconcile(running_on_n1(130, 2).build())
        .await
        .unwrap();
    assert_eq!(outcome.version, Version::new(1));
}

#[tokio::test]
async fn test_sink_failure_reports_reconciliation_failed() {
    let reconciler = Reconciler::new(
        Arc::new(ClusterStore::new()),
        Arc::new(FailingSink {
            message: "database is down".to_string(),
        }),
        ReconcilerConfig::default(),
    );

    let err = reconciler
        .reconcile(running_on_n1(100, 2).build())
        .await
        .unwrap_err();
    match &err {
        ReconcileError::ReconciliationFailed(message) => {
            assert!(message.contains("database is down"))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(reconciler.store().version().version, Version::INITIAL);
    assert!(reconciler.store().node(&node_name("n1")).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_late_sink_acknowledgement_forces_full_rewrite() {
    // The second commit reaches the sink but is acknowledged after the timeout.
    let sink = Arc::new(StallingSink::new(1, Duration::from_secs(60)));
    let reconciler = Reconciler::new(
        Arc::new(ClusterStore::new()),
        sink.clone(),
        ReconcilerConfig {
            timeout: Duration::from_millis(50),
        },
    );
    let store = reconciler.store().clone();

    reconciler.reconcile(running_on_n1(100, 2).build()).await.unwrap();
    let err = reconciler
        .reconcile(running_on_n1(130, 4).build())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::ReconciliationTimeout(_)));
    assert_eq!(store.version().version, Version::new(1));

    reconciler.reconcile(running_on_n1(160, 4).build()).await.unwrap();
    reconciler.reconcile(running_on_n1(190, 6).build()).await.unwrap();

    let commits = sink.commits();
    let versions: Vec<_> = commits.iter().map(|c| c.stamp.version.get()).collect();
    let resyncs: Vec<_> = commits.iter().map(|c| c.resync).collect();
    // The abandoned commit and its retry share version 2; the retry is a
    // full rewrite and later commits go back to deltas.
    assert_eq!(versions, vec![1, 2, 2, 3]);
    assert_eq!(resyncs, vec![true, false, true, false]);
    assert_eq!(store.version(), commits[3].stamp);
}

#[tokio::test]
async fn test_restore_means_deltas_from_the_first_commit() {
    let sink = Arc::new(RecordingSink::default());
    let reconciler = Reconciler::new(
        Arc::new(ClusterStore::new()),
        sink.clone(),
        ReconcilerConfig::default(),
    );
    let mut stamp = Stamp::initial();
    stamp.version = Version::new(7);
    reconciler
        .restore(running_on_n1(100, 2).build(), stamp)
        .unwrap();
    reconciler.reconcile(running_on_n1(130, 4).build()).await.unwrap();

    let commits = sink.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].stamp.version, Version::new(8));
    assert!(!commits[0].resync);
    assert_eq!(commits[0].summary.updated(), 2);
}
