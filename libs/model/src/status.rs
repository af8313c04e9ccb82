//! Status enums for nodes, partitions and jobs.
//!
//! Stored as closed variants so status-dependent rules (for example whether a
//! job may hold allocated resources) are checked exhaustively. Any state the
//! scheduler reports outside the known set reads as `Unknown`, both from JSON
//! and from text.

use serde::{Deserialize, Serialize};

use std::convert::Infallible;

/// Node state as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Idle,
    Mixed,
    Allocated,
    Down,
    #[serde(other)]
    Unknown,
}

/// Partition state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Up,
    Down,
    #[serde(other)]
    Unknown,
}

/// Job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Mixed => "mixed",
            Self::Allocated => "allocated",
            Self::Down => "down",
            Self::Unknown => "unknown",
        }
    }
}

impl PartitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Unknown => "unknown",
        }
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true if the scheduler may legitimately report allocated
    /// resources for a job in this state.
    pub fn may_hold_allocation(&self) -> bool {
        matches!(self, Self::Running | Self::Completed)
    }

    /// Returns true if the job has not started yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for NodeStatus {
    fn from(s: &str) -> Self {
        match s {
            "idle" => Self::Idle,
            "mixed" => Self::Mixed,
            "allocated" => Self::Allocated,
            "down" => Self::Down,
            _ => Self::Unknown,
        }
    }
}

impl From<&str> for PartitionStatus {
    fn from(s: &str) -> Self {
        match s {
            "up" => Self::Up,
            "down" => Self::Down,
            _ => Self::Unknown,
        }
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }
}

macro_rules! infallible_from_str {
    ($($status:ty),*) => {
        $(
            impl std::str::FromStr for $status {
                type Err = Infallible;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Ok(Self::from(s))
                }
            }
        )*
    };
}

infallible_from_str!(NodeStatus, PartitionStatus, JobStatus);
