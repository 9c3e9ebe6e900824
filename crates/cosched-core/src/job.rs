//! Job record and co-scheduling speedup model
//!
//! A job carries its own speedup table keyed by co-job name. The table is
//! summarised once at construction (maximum and mean co-scheduled speedup) so
//! schedulers can rank candidates without rescanning it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::types::{Allocation, JobId};

/// Cores bound by a job placed on whole nodes
pub fn full_node_cores(processes: u32, cores_per_node: u32) -> u32 {
    processes.div_ceil(cores_per_node) * cores_per_node
}

/// Cores bound by a job placed on half-populated nodes
pub fn half_node_cores(processes: u32, cores_per_node: u32) -> u32 {
    let half = cores_per_node / 2;
    processes.div_ceil(half) * half
}

/// Speedup factors of one job against every co-job it has been measured with
///
/// A factor of 1.0 means no interference, above 1.0 the job runs faster when
/// co-located, below 1.0 it is slowed down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct SpeedupTable {
    entries: BTreeMap<String, f64>,
    max_speedup: f64,
    overall_speedup: f64,
}

impl SpeedupTable {
    /// Build a table, rejecting non-positive or non-finite factors
    pub fn new(entries: BTreeMap<String, f64>) -> Result<Self> {
        if let Some((name, &factor)) = entries
            .iter()
            .find(|(_, f)| !(f.is_finite() && **f > 0.0))
        {
            return Err(SimError::InvalidSpeedup {
                job: name.clone(),
                factor,
            });
        }

        let (max_speedup, overall_speedup) = if entries.is_empty() {
            (1.0, 1.0)
        } else {
            let max = entries.values().copied().fold(f64::MIN, f64::max);
            let mean = entries.values().sum::<f64>() / entries.len() as f64;
            (max, mean)
        };

        Ok(Self {
            entries,
            max_speedup,
            overall_speedup,
        })
    }

    /// Table with no measured co-jobs
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            max_speedup: 1.0,
            overall_speedup: 1.0,
        }
    }

    pub fn get(&self, co_job: &str) -> Option<f64> {
        self.entries.get(co_job).copied()
    }

    pub fn contains(&self, co_job: &str) -> bool {
        self.entries.contains_key(co_job)
    }

    /// Best speedup attainable against any measured co-job
    pub fn max_speedup(&self) -> f64 {
        self.max_speedup
    }

    /// Mean speedup over all measured co-jobs
    pub fn overall_speedup(&self) -> f64 {
        self.overall_speedup
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, f)| (name.as_str(), *f))
    }
}

impl Default for SpeedupTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl TryFrom<BTreeMap<String, f64>> for SpeedupTable {
    type Error = SimError;

    fn try_from(entries: BTreeMap<String, f64>) -> Result<Self> {
        Self::new(entries)
    }
}

impl From<SpeedupTable> for BTreeMap<String, f64> {
    fn from(table: SpeedupTable) -> Self {
        table.entries
    }
}

/// One workload item: identity, runtime state and speedup table
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub processes: u32,

    // Timers (seconds)
    pub arrival_time: f64,
    pub wall_time: f64,
    pub remaining_time: f64,
    pub waiting_time: f64,
    pub start_time: Option<f64>,
    pub finish_time: Option<f64>,

    /// Cores bound while running (0 until placed)
    pub binded_cores: u32,

    full_node_cores: u32,
    half_node_cores: u32,
    current_speedup: f64,
    speedups: SpeedupTable,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        processes: u32,
        runtime: f64,
        arrival_time: f64,
        wall_time: f64,
        speedups: SpeedupTable,
    ) -> Self {
        Job {
            id: 0,
            name: name.into(),
            processes,
            arrival_time,
            wall_time,
            remaining_time: runtime,
            waiting_time: 0.0,
            start_time: None,
            finish_time: None,
            binded_cores: 0,
            full_node_cores: 0,
            half_node_cores: 0,
            current_speedup: 1.0,
            speedups,
        }
    }

    /// Compute both footprints for a cluster's node width. Called once at preload.
    pub fn derive_footprints(&mut self, cores_per_node: u32) {
        self.full_node_cores = full_node_cores(self.processes, cores_per_node);
        self.half_node_cores = half_node_cores(self.processes, cores_per_node);
    }

    pub fn full_node_cores(&self) -> u32 {
        self.full_node_cores
    }

    pub fn half_node_cores(&self) -> u32 {
        self.half_node_cores
    }

    /// Cores this job binds under the given allocation
    pub fn cores_for(&self, allocation: Allocation) -> u32 {
        match allocation {
            Allocation::FullNode => self.full_node_cores,
            Allocation::HalfNode => self.half_node_cores,
        }
    }

    pub fn current_speedup(&self) -> f64 {
        self.current_speedup
    }

    pub fn max_speedup(&self) -> f64 {
        self.speedups.max_speedup()
    }

    pub fn overall_speedup(&self) -> f64 {
        self.speedups.overall_speedup()
    }

    pub fn speedups(&self) -> &SpeedupTable {
        &self.speedups
    }

    /// Speedup this job gets when co-located with `co_job`
    pub fn speedup_against(&self, co_job: &str) -> Result<f64> {
        self.speedups.get(co_job).ok_or_else(|| SimError::UnknownCoJob {
            job: self.name.clone(),
            co_job: co_job.to_string(),
        })
    }

    /// Mean of both directions of a pairing, if both are measured
    pub fn mutual_speedup(&self, other: &Job) -> Option<f64> {
        let ours = self.speedups.get(&other.name)?;
        let theirs = other.speedups.get(&self.name)?;
        Some((ours + theirs) / 2.0)
    }

    /// Rescale the remaining time to a new speedup factor
    ///
    /// Returns `Ok(false)` without touching the job when `factor` is already
    /// the applied speedup.
    pub fn apply_speedup(&mut self, factor: f64) -> Result<bool> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(SimError::InvalidSpeedup {
                job: self.name.clone(),
                factor,
            });
        }

        if factor == self.current_speedup {
            return Ok(false);
        }

        self.remaining_time *= self.current_speedup / factor;
        self.current_speedup = factor;
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        self.start_time.is_some() && self.finish_time.is_none()
    }
}
