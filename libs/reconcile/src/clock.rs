//! Staleness clock: the version and timestamps of the last successful
//! reconciliation, readable without locks.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::StateDigest;

/// Monotonic state version. Version 0 means nothing was committed yet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const INITIAL: Version = Version(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// The version following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the clock reports: one successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub version: Version,
    /// When the committed snapshot was observed at the scheduler.
    pub observed_at: DateTime<Utc>,
    /// When the commit became visible.
    pub committed_at: DateTime<Utc>,
    /// Digest of the committed row content.
    pub digest: StateDigest,
}

impl Stamp {
    /// The stamp of a store that has never committed.
    pub fn initial() -> Self {
        Self {
            version: Version::INITIAL,
            observed_at: DateTime::<Utc>::UNIX_EPOCH,
            committed_at: DateTime::<Utc>::UNIX_EPOCH,
            digest: StateDigest::default(),
        }
    }
}

/// Something committed under a [`Stamp`].
pub trait Stamped {
    fn stamp(&self) -> &Stamp;
}

impl Stamped for Stamp {
    fn stamp(&self) -> &Stamp {
        self
    }
}

/// Process-wide "last successful reconciliation" marker.
///
/// The clock holds one pointer to the latest committed value, so the stamp
/// and whatever it was committed with are always swapped together. Any
/// number of readers may call [`StalenessClock::current`] concurrently.
#[derive(Debug)]
pub struct StalenessClock<T = Stamp> {
    current: ArcSwap<T>,
}

impl Default for StalenessClock<Stamp> {
    fn default() -> Self {
        Self::new(Stamp::initial())
    }
}

impl<T: Stamped> StalenessClock<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(value),
        }
    }

    /// The latest committed value.
    pub fn current(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// The stamp of the latest committed value.
    pub fn stamp(&self) -> Stamp {
        self.current.load().stamp().clone()
    }

    pub fn version(&self) -> Version {
        self.current.load().stamp().version
    }

    /// True if a commit newer than `version` has been made.
    pub fn changed_since(&self, version: Version) -> bool {
        self.version() > version
    }

    /// Advance to a new value. Values stamped older than the current one
    /// are ignored; returns whether the value was stored.
    pub(crate) fn advance(&self, value: T) -> bool {
        let value = Arc::new(value);
        let previous = self.current.rcu(|current| {
            if value.stamp().version >= current.stamp().version {
                Arc::clone(&value)
            } else {
                Arc::clone(current)
            }
        });
        previous.stamp().version <= value.stamp().version
    }
}
