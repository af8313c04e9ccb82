//! # clusterboard-model
//!
//! Records exchanged between the scheduler data source and the cluster
//! state consistency layer.
//!
//! ## Design Principles
//!
//! - Keys are typed so a node name can never be passed where a job id is expected
//! - Status values are closed enums; unknown scheduler states map to `Unknown`
//! - A [`Snapshot`] is one complete observation: one collection per entity
//!   kind (nodes, partitions, jobs) and one per relation (memberships,
//!   node resources, job resources, allocations)
//!
//! ## Wire Format
//!
//! Snapshots are JSON documents. Timestamps are RFC 3339 UTC instants and
//! status values are snake_case:
//!
//! ```json
//! {
//!   "observed_at": "2026-10-01T12:00:00Z",
//!   "nodes": [{ "name": "n1", "status": "idle", "cpus": 8, "memory_mb": 32000,
//!               "updated_at": "2026-10-01T12:00:00Z" }],
//!   "node_resources": [{ "node": "n1", "kind": "cpu", "total": 8, "available": 8 }]
//! }
//! ```

mod error;
mod keys;
mod macros;
mod records;
mod snapshot;
mod status;

pub use error::KeyError;
pub use keys::*;
pub use records::*;
pub use snapshot::Snapshot;
pub use status::*;
