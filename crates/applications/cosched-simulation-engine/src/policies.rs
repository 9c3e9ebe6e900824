//! Time-advance policies
//!
//! A policy moves simulated time to the next event and hands the cores of
//! finished jobs back to the cluster. The two variants differ only in what
//! happens to a unit that loses members.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use cosched_core::{JobId, Result, SimError};

use crate::cluster::ClusterState;

/// Result of advancing to the next event
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    /// Simulated seconds that elapsed
    pub step: f64,
    /// Jobs that finished at the new makespan, ascending by id
    pub finished: Vec<JobId>,
}

/// Policy trait for time advance and resource release
pub trait ClusterPolicy {
    /// Get policy name
    fn name(&self) -> &str;

    /// Advance to the next completion or arrival
    fn next_state(&mut self, cluster: &mut ClusterState) -> Result<Advance>;

    /// Return vacated cores to the free pool, returns the number of cores freed
    fn free_resources(&mut self, cluster: &mut ClusterState) -> Result<u32>;
}

/// Available policies, selectable from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Exhaustive,
    Shallow,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn ClusterPolicy> {
        match self {
            PolicyKind::Exhaustive => Box::new(ExhaustivePolicy::new()),
            PolicyKind::Shallow => Box::new(ShallowPolicy::new()),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exhaustive" => Ok(PolicyKind::Exhaustive),
            "shallow" => Ok(PolicyKind::Shallow),
            other => Err(SimError::config(format!("unknown cluster policy '{other}'"))),
        }
    }
}

/// Move time forward to the nearest completion or arrival
///
/// Waiting jobs accrue the elapsed time, running jobs lose it. Jobs that hit
/// exactly zero are vacated from their slot and stamped with the new makespan.
fn advance_to_next_event(cluster: &mut ClusterState) -> Result<Advance> {
    let next_completion = cluster
        .units
        .iter()
        .flat_map(|unit| unit.jobs())
        .map(|job| job.remaining_time)
        .min_by(f64::total_cmp);

    let makespan = cluster.makespan;
    let next_arrival = cluster
        .preloaded
        .iter()
        .map(|job| job.arrival_time - makespan)
        .filter(|gap| *gap > 0.0)
        .min_by(f64::total_cmp);

    let step = match (next_completion, next_arrival) {
        (Some(c), Some(a)) => c.min(a),
        (Some(c), None) => c,
        (None, Some(a)) => a,
        (None, None) => return Err(SimError::NoNextEvent),
    };

    cluster.makespan += step;
    let now = cluster.makespan;

    for job in cluster.waiting.iter_mut() {
        job.waiting_time += step;
    }

    let mut finished = Vec::new();
    for unit in cluster.units.iter_mut() {
        for idx in 0..unit.width() {
            let Some(job) = unit.job_at_mut(idx) else {
                continue;
            };

            job.remaining_time -= step;
            if job.remaining_time < 0.0 {
                return Err(SimError::NegativeRemainingTime {
                    job: job.id,
                    remaining: job.remaining_time,
                });
            }

            if job.remaining_time == 0.0 {
                if let Some(mut done) = unit.vacate(idx) {
                    done.finish_time = Some(now);
                    finished.push(done);
                }
            }
        }
    }

    finished.sort_by_key(|job| job.id);
    let ids: Vec<JobId> = finished.iter().map(|job| job.id).collect();

    if !ids.is_empty() {
        debug!(makespan = now, step, finished = ?ids, "Jobs finished");
    } else {
        trace!(makespan = now, step, "Advanced to next arrival");
    }

    cluster.finished_jobs.extend(ids.iter().copied());
    cluster.completed.extend(finished);

    Ok(Advance {
        step,
        finished: ids,
    })
}

/// Credit every unit's vacated cores back to the cluster
fn reclaim_vacated_cores(cluster: &mut ClusterState) -> Result<u32> {
    let freed: u32 = cluster
        .units
        .iter_mut()
        .map(|unit| unit.take_vacated_cores())
        .sum();

    let free = cluster.free_cores + freed;
    if free > cluster.total_cores() {
        return Err(SimError::accounting(format!(
            "releasing {freed} cores would leave {free} free of {}",
            cluster.total_cores()
        )));
    }
    cluster.free_cores = free;

    cluster.units.retain(|unit| !unit.is_vacant());
    Ok(freed)
}

/// Re-resolve interference in every occupied unit
fn resolve_all(cluster: &mut ClusterState) -> Result<()> {
    for unit in cluster.units.iter_mut().filter(|unit| !unit.is_vacant()) {
        unit.resolve_interference()?;
    }
    Ok(())
}

/// Keeps units in their deployed shape until they empty
pub struct ExhaustivePolicy;

impl ExhaustivePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExhaustivePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterPolicy for ExhaustivePolicy {
    fn name(&self) -> &str {
        "Exhaustive"
    }

    fn next_state(&mut self, cluster: &mut ClusterState) -> Result<Advance> {
        let advance = advance_to_next_event(cluster)?;
        resolve_all(cluster)?;
        Ok(advance)
    }

    fn free_resources(&mut self, cluster: &mut ClusterState) -> Result<u32> {
        reclaim_vacated_cores(cluster)
    }
}

/// Rebinds a lone survivor into a one-slot unit of its own size
///
/// The survivor then runs solo instead of spread, and the unit stops
/// advertising empty slots to backfilling.
pub struct ShallowPolicy;

impl ShallowPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShallowPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterPolicy for ShallowPolicy {
    fn name(&self) -> &str {
        "Shallow"
    }

    fn next_state(&mut self, cluster: &mut ClusterState) -> Result<Advance> {
        let advance = advance_to_next_event(cluster)?;

        for unit in cluster.units.iter_mut() {
            if unit.vacated_cores() > 0 && unit.occupied_count() == 1 && !unit.is_filled() {
                unit.compact();
                trace!(unit = %unit.id(), jobs = ?unit.job_ids(), "Compacted unit");
            }
        }

        resolve_all(cluster)?;
        Ok(advance)
    }

    fn free_resources(&mut self, cluster: &mut ClusterState) -> Result<u32> {
        reclaim_vacated_cores(cluster)
    }
}
