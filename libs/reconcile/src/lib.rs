//! Cluster state consistency layer.
//!
//! This library turns successive scheduler snapshots into committed cluster
//! states. Key concepts:
//!
//! - **Snapshot**: one complete observation of the scheduler (from the feed).
//! - **Committed state**: what readers see; immutable once published.
//! - **Reconciliation**: validate, diff, apply to a working copy, publish.
//!
//! # Invariants
//!
//! - Readers observe either the previous or the next commit, never a mixture
//! - Σ used per (node, resource kind) never exceeds the node's capacity
//! - A job's allocation never exceeds its request; pending jobs hold nothing
//! - Partition aggregates are rebuilt from member nodes on every commit
//! - The version advances exactly once per successful reconciliation

mod aggregates;
mod allocations;
mod clock;
mod diff;
mod digest;
mod entities;
mod error;
mod ledger;
mod reconciler;
mod sink;
mod state;
mod store;
mod table;
mod validate;

pub use aggregates::{node_capacity, PartitionSummary, ResourceFigures};
pub use allocations::AllocationGraph;
pub use clock::{StalenessClock, Stamp, Stamped, Version};
pub use diff::{ChangeSet, ChangeSummary};
pub use digest::StateDigest;
pub use entities::EntityStore;
pub use error::{LedgerViolation, ReconcileError, SnapshotDefect};
pub use ledger::ResourceLedger;
pub use reconciler::{
    ReconcileOutcome, Reconciler, ReconcilerConfig, DEFAULT_RECONCILE_TIMEOUT,
};
pub use sink::{Commit, CommitSink, NoopSink, SinkError};
pub use state::ClusterState;
pub use store::{ClusterStore, CommittedState, NodeView, PartitionView};
pub use table::{Table, TableCounts, TableDiff};
pub use validate::{find_defects, validate};

/// Default interval between snapshot polls.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
