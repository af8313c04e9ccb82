//! Snapshot reconciler.
//!
//! The reconciler is responsible for:
//! - Validating an incoming snapshot
//! - Diffing it against the committed state
//! - Applying the diff to a private working copy (the transaction)
//! - Recomputing node and partition aggregates
//! - Handing the commit to the sink, then publishing it atomically
//!
//! Only one reconciliation runs at a time. A second caller is rejected, not
//! queued.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clusterboard_model::{NodeName, Snapshot};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::aggregates::node_capacity;
use crate::clock::{Stamp, Version};
use crate::diff::{ChangeSet, ChangeSummary};
use crate::digest::StateDigest;
use crate::error::ReconcileError;
use crate::sink::{Commit, CommitSink};
use crate::state::ClusterState;
use crate::store::{ClusterStore, CommittedState};
use crate::validate::validate;

/// Default bound on one reconciliation, sink write included.
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconciler settings.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Bound on one reconciliation. On expiry the transaction is dropped.
    pub timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub version: Version,
    pub stamp: Stamp,
    pub summary: ChangeSummary,
}

/// The single writer of a [`ClusterStore`].
pub struct Reconciler {
    store: Arc<ClusterStore>,
    sink: Arc<dyn CommitSink>,
    config: ReconcilerConfig,
    in_flight: Mutex<()>,
    /// Set when the sink may hold something other than the committed state.
    resync: AtomicBool,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("version", &self.store.version().version)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler writing into `store` and mirroring into `sink`.
    ///
    /// Until [`Reconciler::restore`] says otherwise the sink's content is
    /// unknown, so the first commit is written in full.
    pub fn new(store: Arc<ClusterStore>, sink: Arc<dyn CommitSink>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            sink,
            config,
            in_flight: Mutex::new(()),
            resync: AtomicBool::new(true),
        }
    }

    /// The store this reconciler commits into.
    pub fn store(&self) -> &Arc<ClusterStore> {
        &self.store
    }

    /// Reconcile one snapshot into the store.
    ///
    /// On success every change becomes visible at once and the version
    /// advances by one, even when no row changed. On failure the store and
    /// clock are left as they were.
    #[instrument(skip(self, snapshot), fields(observed_at = %snapshot.observed_at, rows = snapshot.row_count()))]
    pub async fn reconcile(&self, snapshot: Snapshot) -> Result<ReconcileOutcome, ReconcileError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ReconcileError::ReconciliationInProgress)?;

        let timeout = self.config.timeout;
        let result = match tokio::time::timeout(timeout, self.run(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::ReconciliationTimeout(timeout)),
        };

        match &result {
            Ok(outcome) => info!(
                version = %outcome.version,
                inserted = outcome.summary.inserted(),
                updated = outcome.summary.updated(),
                deleted = outcome.summary.deleted(),
                touched = outcome.summary.touched(),
                digest = %outcome.stamp.digest,
                "Reconciliation committed"
            ),
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Reconciliation rejected");
                if matches!(
                    e,
                    ReconcileError::ReconciliationTimeout(_) | ReconcileError::ReconciliationFailed(_)
                ) && !self.resync.swap(true, Ordering::AcqRel)
                {
                    warn!("Sink may have diverged; next commit rewrites it in full");
                }
            }
        }

        result
    }

    /// Load a previously persisted state without writing it to the sink.
    ///
    /// Used at startup to resume from the mirror. The stamp is published as
    /// is, so the version continues where the previous process stopped.
    #[instrument(skip(self, snapshot, stamp), fields(version = %stamp.version))]
    pub fn restore(&self, snapshot: Snapshot, stamp: Stamp) -> Result<(), ReconcileError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ReconcileError::ReconciliationInProgress)?;

        validate(&snapshot)?;
        let base = ClusterState::default();
        let changes = ChangeSet::compute(&base, &snapshot);
        let state = apply(base, &changes)?;

        match StateDigest::of(&state) {
            Ok(digest) if digest != stamp.digest => warn!(
                stored = %stamp.digest,
                computed = %digest,
                "Restored state digest differs from stored digest"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to compute digest of restored state"),
        }

        info!(rows = state.row_count(), "Restored committed state");
        self.store.publish(CommittedState { state, stamp });
        // The state came from the sink, so the two agree again.
        self.resync.store(false, Ordering::Release);
        Ok(())
    }

    async fn run(&self, snapshot: Snapshot) -> Result<ReconcileOutcome, ReconcileError> {
        validate(&snapshot)?;

        let previous = self.store.snapshot();
        if snapshot.observed_at < previous.stamp.observed_at {
            warn!(
                committed_observed_at = %previous.stamp.observed_at,
                "Snapshot is older than the committed state"
            );
        }

        let changes = ChangeSet::compute(&previous.state, &snapshot);
        let next = apply(previous.state.clone(), &changes)?;

        let digest =
            StateDigest::of(&next).map_err(|e| ReconcileError::ReconciliationFailed(e.to_string()))?;
        let version = previous.stamp.version.next();
        let stamp = Stamp {
            version,
            observed_at: snapshot.observed_at,
            committed_at: Utc::now(),
            digest,
        };

        let resync = self.resync.load(Ordering::Acquire);
        self.sink
            .persist(Commit {
                stamp: &stamp,
                changes: &changes,
                state: &next,
                resync,
            })
            .await
            .map_err(|e| ReconcileError::ReconciliationFailed(e.to_string()))?;

        // Nothing may await between the sink commit and the publish.
        self.resync.store(false, Ordering::Release);
        let summary = changes.summary();
        self.store.publish(CommittedState {
            state: next,
            stamp: stamp.clone(),
        });

        Ok(ReconcileOutcome {
            version,
            stamp,
            summary,
        })
    }
}

/// Apply a change set to a working copy of the state.
///
/// Deletes run first, relations before their owners, so no row is ever left
/// pointing at a removed entity. Upserts follow, owners before relations.
/// Aggregates are rebuilt last.
fn apply(mut state: ClusterState, changes: &ChangeSet) -> Result<ClusterState, ReconcileError> {
    for key in &changes.allocations.deleted {
        state.allocations.remove(key);
    }
    for key in &changes.job_resources.deleted {
        state.ledger.remove_job_resource(key);
    }
    for id in &changes.jobs.deleted {
        state.entities.remove_job(id);
        let resources = state.ledger.remove_job(id);
        let allocations = state.allocations.remove_job(id);
        debug!(job = %id, resources, allocations, "Job retired");
    }
    for key in &changes.node_partitions.deleted {
        state.entities.remove_membership(key);
    }
    for key in &changes.node_resources.deleted {
        state.ledger.remove_node_resource(key);
    }
    for name in &changes.nodes.deleted {
        state.entities.remove_node(name);
        let resources = state.ledger.remove_node(name);
        let allocations = state.allocations.remove_node(name);
        debug!(node = %name, resources, allocations, "Node retired");
    }
    for name in &changes.partitions.deleted {
        state.entities.remove_partition(name);
    }

    for partition in changes.partitions.writes() {
        state.entities.put_partition(partition.clone());
    }
    for node in changes.nodes.writes() {
        state.entities.put_node(node.clone());
    }
    for membership in changes.node_partitions.writes() {
        state.entities.put_membership(membership.clone());
    }
    for job in changes.jobs.writes() {
        state.entities.put_job(job.clone());
    }

    let ClusterState {
        entities,
        ledger,
        allocations,
        ..
    } = &mut state;

    ledger.replace_node_resources(changes.node_resources.writes())?;
    ledger.verify_node_owners(|name| entities.node(name).is_some())?;
    ledger.replace_job_resources(changes.job_resources.writes(), |id| {
        entities.job(id).map(|job| job.status)
    })?;
    for job in &changes.jobs.updated {
        ledger.verify_job(&job.job_id, job.status)?;
    }

    // Nodes whose capacity may have moved need their existing allocations
    // rechecked even when no allocation row changed.
    let recheck: BTreeSet<NodeName> = changes
        .nodes
        .updated
        .iter()
        .map(|n| n.name.clone())
        .chain(changes.node_resources.writes().map(|r| r.node.clone()))
        .chain(changes.node_resources.deleted.iter().map(|(node, _)| node.clone()))
        .collect();
    allocations.write(changes.allocations.writes(), &recheck, |node, kind| {
        node_capacity(entities, ledger, node, kind)
    })?;

    state.recompute_aggregates();
    Ok(state)
}
