//! Core identifiers and placement shapes shared across the workspace

use serde::{Deserialize, Serialize};

/// Sequential job identifier assigned at preload time
pub type JobId = u64;

/// Stable handle for an execution unit in the cluster's unit list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "xunit-{}", self.0)
    }
}

/// How many cores a job binds when it is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allocation {
    /// Whole nodes: `ceil(processes / cores_per_node) * cores_per_node`
    FullNode,
    /// Half-populated nodes: `ceil(processes / (cores_per_node/2)) * (cores_per_node/2)`
    HalfNode,
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Allocation::FullNode => write!(f, "full-node"),
            Allocation::HalfNode => write!(f, "half-node"),
        }
    }
}

/// Shape of a new execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitShape {
    /// Number of job slots
    pub slots: usize,
    /// Cores the unit may bind in total
    pub core_capacity: u32,
}

impl UnitShape {
    pub fn new(slots: usize, core_capacity: u32) -> Self {
        Self { slots, core_capacity }
    }

    /// A single-slot unit sized for one compact job
    pub fn compact(cores: u32) -> Self {
        Self::new(1, cores)
    }
}

/// Phase of the engine's step loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Scheduling,
    Advancing,
    Draining,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Scheduling => write!(f, "scheduling"),
            Phase::Advancing => write!(f, "advancing"),
            Phase::Draining => write!(f, "draining"),
        }
    }
}
