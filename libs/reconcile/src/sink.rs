//! Durable mirror of committed state.
//!
//! The reconciler hands every commit to a [`CommitSink`] before publishing
//! it. A sink error aborts the reconciliation. A sink may still have stored
//! a commit the reconciler then abandoned (a timeout that fired after the
//! database committed, or a lost acknowledgement), so after any such
//! failure the next commit is flagged [`Commit::resync`] and the sink
//! replaces its whole content instead of applying the delta.

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::Stamp;
use crate::diff::ChangeSet;
use crate::state::ClusterState;

/// One commit, as seen by a sink.
#[derive(Debug, Clone, Copy)]
pub struct Commit<'a> {
    pub stamp: &'a Stamp,
    /// Row changes against the previous version.
    pub changes: &'a ChangeSet,
    /// The complete next state, including recomputed aggregates.
    pub state: &'a ClusterState,
    /// The mirror may disagree with the previous version; write `state`
    /// in full rather than applying `changes`.
    pub resync: bool,
}

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink write failed: {0}")]
    Write(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Receives every commit inside the reconciliation boundary.
#[async_trait]
pub trait CommitSink: Send + Sync {
    /// Persist a commit. Must be all-or-nothing.
    async fn persist(&self, commit: Commit<'_>) -> Result<(), SinkError>;
}

/// A sink that keeps nothing; state lives only in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl CommitSink for NoopSink {
    async fn persist(&self, _commit: Commit<'_>) -> Result<(), SinkError> {
        Ok(())
    }
}
