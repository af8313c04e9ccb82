//! Ingest background worker.
//!
//! Fetches one snapshot per tick from the configured source and hands it to
//! the reconciler. A failed tick is logged and the loop carries on; the
//! committed state stays at the last good snapshot.

use std::sync::Arc;
use std::time::Duration;

use clusterboard_reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::source::{SnapshotSource, SourceError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("snapshot fetch failed: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Periodically pulls snapshots and reconciles them.
pub struct IngestWorker {
    source: Box<dyn SnapshotSource>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl IngestWorker {
    pub fn new(
        source: Box<dyn SnapshotSource>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            reconciler,
            interval,
        }
    }

    /// Run until shutdown is signaled. The first poll happens immediately.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            source = %self.source.describe(),
            "Starting ingest worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        log_failure(&e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Ingest worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fetch one snapshot and reconcile it.
    pub async fn poll_once(&self) -> Result<ReconcileOutcome, IngestError> {
        let snapshot = self.source.fetch().await?;
        let outcome = self.reconciler.reconcile(snapshot).await?;

        if !outcome.summary.is_noop() {
            info!(
                version = %outcome.version,
                inserted = outcome.summary.inserted(),
                updated = outcome.summary.updated(),
                deleted = outcome.summary.deleted(),
                "Cluster state changed"
            );
        }
        Ok(outcome)
    }
}

fn log_failure(err: &IngestError) {
    match err {
        IngestError::Reconcile(e) if e.is_transient() => {
            warn!(error = %e, kind = e.kind(), "Ingest tick skipped");
        }
        IngestError::Reconcile(e) => {
            error!(error = %e, kind = e.kind(), "Snapshot rejected");
        }
        IngestError::Source(e) => {
            error!(error = %e, "Snapshot fetch failed");
        }
    }
}
