//! Content digest of a committed state.
//!
//! The digest covers row content only. Observation timestamps are stripped,
//! so two versions with identical rows share a digest even when the second
//! one refreshed every `updated_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state::ClusterState;

const TIMESTAMP_FIELDS: [&str; 2] = ["updated_at", "observed_at"];

/// A deterministic hash of the committed rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDigest(String);

impl StateDigest {
    /// Compute the digest of a state.
    pub fn of(state: &ClusterState) -> Result<Self, serde_json::Error> {
        let mut value = serde_json::to_value(state.to_snapshot(DateTime::<Utc>::UNIX_EPOCH))?;
        strip_timestamps(&mut value);
        Ok(Self::from_json(&value))
    }

    /// Compute a digest of compact JSON. Object keys come out sorted
    /// because `serde_json::Map` is a `BTreeMap` without `preserve_order`.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(json.to_string().as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16])))
    }

    /// Wrap a digest string read back from storage.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn strip_timestamps(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for field in TIMESTAMP_FIELDS {
                map.remove(field);
            }
            map.values_mut().for_each(strip_timestamps);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_timestamps),
        _ => {}
    }
}
