use tracing::{debug, trace};

use cosched_core::{Allocation, JobId, Result, UnitShape};

use crate::cluster::ClusterState;
use crate::scheduler::{Scheduler, SubmissionResult};

/// FIFO with EASY backfilling
///
/// When the queue head is blocked it gets a reservation at the shadow time,
/// the earliest moment enough cores are expected to be free for it, based on
/// the running jobs' wall-time estimates. Later jobs may start now if they
/// finish before the shadow time or only use cores the head will not need.
pub struct EasyScheduler;

impl EasyScheduler {
    pub fn new() -> Self {
        Self
    }

    fn place_in_order(cluster: &mut ClusterState) -> Result<usize> {
        let mut placed = 0;
        while let Some(head) = cluster.waiting().first() {
            let (id, cores) = (head.id, head.full_node_cores());
            if cores > cluster.free_cores() {
                break;
            }
            cluster.deploy_unit(UnitShape::compact(cores), &[(id, Allocation::FullNode)])?;
            placed += 1;
        }
        Ok(placed)
    }

    /// Shadow time and spare cores for a blocked job needing `need` cores
    fn reservation(cluster: &ClusterState, need: u32) -> (f64, u32) {
        let now = cluster.makespan();
        let mut releases: Vec<(f64, u32)> = cluster
            .running_jobs()
            .map(|job| {
                let start = job.start_time.unwrap_or(now);
                ((start + job.wall_time).max(now), job.binded_cores)
            })
            .collect();
        releases.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut available = cluster.free_cores();
        for (end, cores) in releases {
            available += cores;
            if available >= need {
                return (end, available - need);
            }
        }
        (f64::INFINITY, 0)
    }
}

impl Default for EasyScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for EasyScheduler {
    fn name(&self) -> &str {
        "EASY"
    }

    fn backfill_enabled(&self) -> bool {
        true
    }

    fn submit(&mut self, cluster: &mut ClusterState) -> Result<SubmissionResult> {
        let mut placed = Self::place_in_order(cluster)?;

        let Some(head) = cluster.waiting().first() else {
            return Ok(SubmissionResult::from_placed(placed));
        };
        let (shadow, mut spare) = Self::reservation(cluster, head.full_node_cores());
        trace!(job = head.id, shadow, spare, "Reserved queue head");

        let now = cluster.makespan();
        let mut candidates: Vec<(JobId, u32, f64)> = cluster
            .waiting()
            .iter()
            .skip(1)
            .map(|job| (job.id, job.full_node_cores(), job.wall_time))
            .collect();
        candidates.sort_by(|a, b| a.2.total_cmp(&b.2));

        for (id, cores, wall_time) in candidates {
            if cores > cluster.free_cores() {
                continue;
            }
            let ends_before_shadow = now + wall_time <= shadow;
            if !ends_before_shadow && cores > spare {
                continue;
            }

            cluster.deploy_unit(UnitShape::compact(cores), &[(id, Allocation::FullNode)])?;
            if !ends_before_shadow {
                spare -= cores;
            }
            placed += 1;
            debug!(job = id, cores, shadow, "Backfilled job");
        }

        Ok(SubmissionResult::from_placed(placed))
    }
}
