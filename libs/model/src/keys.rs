//! Typed key definitions for cluster entities and resource kinds.

use crate::define_key;

define_key!(NodeName, "node name");
define_key!(PartitionName, "partition name");
define_key!(JobId, "job id");
define_key!(ResourceKind, "resource kind");

impl ResourceKind {
    /// Scheduler name of the CPU resource.
    pub const CPU: &'static str = "cpu";

    /// Scheduler name of the memory resource (MiB).
    pub const MEMORY: &'static str = "mem";

    /// Scheduler name of the generic GPU resource.
    pub const GPU: &'static str = "gres/gpu";

    /// The CPU resource kind.
    #[must_use]
    pub fn cpu() -> Self {
        Self(Self::CPU.to_string())
    }

    /// The memory resource kind.
    #[must_use]
    pub fn memory() -> Self {
        Self(Self::MEMORY.to_string())
    }

    /// The generic GPU resource kind.
    #[must_use]
    pub fn gpu() -> Self {
        Self(Self::GPU.to_string())
    }

    /// Returns true for the CPU resource kind.
    pub fn is_cpu(&self) -> bool {
        self.0 == Self::CPU
    }

    /// Returns true for the memory resource kind.
    pub fn is_memory(&self) -> bool {
        self.0 == Self::MEMORY
    }
}
