//! Ranks co-scheduler
//!
//! Every waiting job is ranked by how many other waiting jobs it pairs well
//! with (mutual speedup above `ranks_threshold`). A submission pass then:
//! 1. fills open slots of running units with compatible waiting jobs
//! 2. deploys rank-0 jobs compactly, since nothing in the queue helps them
//! 3. co-locates the remaining jobs in shared units at half-node binding

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use cosched_core::{Allocation, ExecutionUnit, Job, JobId, Result, SimError, UnitId, UnitShape};

use super::matching::Matching;
use crate::cluster::ClusterState;
use crate::scheduler::{Scheduler, SubmissionResult};

pub struct RanksCoscheduler {
    threshold: f64,
    ranks_threshold: f64,
    matching: Matching,
    ranks: HashMap<JobId, usize>,
}

impl RanksCoscheduler {
    pub fn new(threshold: f64, ranks_threshold: f64, matching: Matching) -> Result<Self> {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(SimError::config(format!("threshold must be positive, got {threshold}")));
        }
        if !(ranks_threshold.is_finite() && ranks_threshold >= threshold) {
            return Err(SimError::config(format!(
                "ranks_threshold ({ranks_threshold}) must be at least threshold ({threshold})"
            )));
        }

        Ok(Self {
            threshold,
            ranks_threshold,
            matching,
            ranks: HashMap::new(),
        })
    }

    pub fn rank(&self, job: JobId) -> usize {
        self.ranks.get(&job).copied().unwrap_or(0)
    }

    fn update_ranks(&mut self, waiting: &[Job]) {
        self.ranks = waiting.iter().map(|job| (job.id, 0)).collect();

        for (i, a) in waiting.iter().enumerate() {
            for b in &waiting[i + 1..] {
                if a.mutual_speedup(b).is_some_and(|s| s > self.ranks_threshold) {
                    *self.ranks.entry(a.id).or_default() += 1;
                    *self.ranks.entry(b.id).or_default() += 1;
                }
            }
        }
    }

    /// Mutual speedup of `job` with the unit's dominant job, if it may join
    ///
    /// A newcomer never binds more cores than the dominant job, but it may tie
    /// with it. On a tie the newcomer takes over dominance when its slot comes
    /// first, so it has to be measured against every occupant.
    fn colocation_weight(&self, unit: &ExecutionUnit, job: &Job, free_cores: u32) -> Option<f64> {
        let cores = job.half_node_cores();
        if cores > unit.free_capacity() || cores > free_cores {
            return None;
        }

        let dominant = unit.dominant()?;
        if cores > dominant.binded_cores {
            return None;
        }

        // Either may end up dominant on a tie, so both directions must be known
        let known = unit.jobs().all(|occupant| {
            occupant.speedups().contains(&job.name) && job.speedups().contains(&occupant.name)
        });
        if !known {
            return None;
        }

        dominant
            .mutual_speedup(job)
            .filter(|&speedup| speedup > self.threshold)
    }

    /// Backfill open slots of running units
    fn fill_units(&self, cluster: &mut ClusterState) -> Result<usize> {
        let (unit_ids, candidates, plan) = {
            let open: Vec<&ExecutionUnit> = cluster
                .nonfilled_units()
                .into_iter()
                .filter(|unit| !unit.is_vacant())
                .collect();
            let waiting = cluster.waiting();
            if open.is_empty() || waiting.is_empty() {
                return Ok(0);
            }

            let weights: Vec<Vec<Option<f64>>> = open
                .iter()
                .map(|unit| {
                    waiting
                        .iter()
                        .map(|job| self.colocation_weight(unit, job, cluster.free_cores()))
                        .collect()
                })
                .collect();

            let plan = self.matching.plan(&weights, waiting.len());
            let unit_ids: Vec<UnitId> = open.iter().map(|unit| unit.id()).collect();
            let candidates: Vec<(JobId, u32)> = waiting
                .iter()
                .map(|job| (job.id, job.half_node_cores()))
                .collect();
            (unit_ids, candidates, plan)
        };

        let mut placed = 0;
        for (row, col) in plan {
            let (job_id, cores) = candidates[col];
            if cores > cluster.free_cores() {
                continue;
            }
            cluster.place_in_unit(unit_ids[row], job_id, Allocation::HalfNode)?;
            debug!(unit = %unit_ids[row], job = job_id, "Co-located job into running unit");
            placed += 1;
        }

        Ok(placed)
    }

    /// Jobs with no good partner in the queue run alone on whole nodes
    fn deploy_compact(&self, cluster: &mut ClusterState) -> Result<usize> {
        let loners: Vec<(JobId, u32)> = cluster
            .waiting()
            .iter()
            .filter(|job| self.rank(job.id) == 0)
            .map(|job| (job.id, job.full_node_cores()))
            .collect();

        let mut placed = 0;
        for (id, cores) in loners {
            if cores > cluster.free_cores() {
                continue;
            }
            cluster.deploy_unit(UnitShape::compact(cores), &[(id, Allocation::FullNode)])?;
            placed += 1;
        }
        Ok(placed)
    }

    /// Group waiting jobs around a head job
    ///
    /// Heads are taken largest half-node footprint first. Partners must not
    /// be larger than the head and together fit in the head's footprint, so
    /// the head stays dominant. Every pair of members must be measured in both
    /// directions.
    fn plan_groups(&self, waiting: &[Job], mut free_cores: u32) -> Vec<(UnitShape, Vec<(JobId, Allocation)>)> {
        let mut order: Vec<&Job> = waiting.iter().collect();
        order.sort_by(|a, b| b.half_node_cores().cmp(&a.half_node_cores()));

        let mut used: HashSet<JobId> = HashSet::new();
        let mut groups = Vec::new();

        for head in &order {
            if used.contains(&head.id) {
                continue;
            }

            let mut partners: Vec<(&Job, f64)> = order
                .iter()
                .filter(|co| co.id != head.id && !used.contains(&co.id))
                .filter(|co| co.half_node_cores() <= head.half_node_cores())
                .filter_map(|co| {
                    head.mutual_speedup(co)
                        .filter(|&s| s > self.threshold)
                        .map(|s| (*co, s))
                })
                .collect();
            partners.sort_by(|a, b| b.1.total_cmp(&a.1));

            let mut budget = head.half_node_cores();
            let mut chosen: Vec<&Job> = vec![*head];
            for (co, _) in partners {
                // Any member may become dominant once the head finishes
                let known = chosen.iter().all(|member| member.mutual_speedup(co).is_some());
                if known && co.half_node_cores() <= budget {
                    budget -= co.half_node_cores();
                    chosen.push(co);
                }
            }
            let members: Vec<(JobId, Allocation)> = chosen
                .iter()
                .map(|job| (job.id, Allocation::HalfNode))
                .collect();
            if members.len() < 2 {
                continue;
            }

            let capacity = 2 * head.half_node_cores();
            let need = capacity - budget;
            if need > free_cores {
                continue;
            }

            free_cores -= need;
            let slots = members.len() + usize::from(budget > 0);
            used.extend(members.iter().map(|(id, _)| *id));
            groups.push((UnitShape::new(slots, capacity), members));
        }

        groups
    }

    fn deploy_groups(&self, cluster: &mut ClusterState) -> Result<usize> {
        let groups = self.plan_groups(cluster.waiting(), cluster.free_cores());

        let mut placed = 0;
        for (shape, members) in groups {
            let unit = cluster.deploy_unit(shape, &members)?;
            trace!(unit = %unit, members = members.len(), "Deployed co-scheduled unit");
            placed += members.len();
        }
        Ok(placed)
    }

    /// An idle cluster always starts its queue head so ranked jobs cannot stall
    fn unblock(&self, cluster: &mut ClusterState) -> Result<usize> {
        if !cluster.units().is_empty() {
            return Ok(0);
        }
        let Some(head) = cluster.waiting().first() else {
            return Ok(0);
        };
        let (id, cores) = (head.id, head.full_node_cores());
        if cores > cluster.free_cores() {
            return Ok(0);
        }

        debug!(job = id, "No pairing possible on an idle cluster, running queue head alone");
        cluster.deploy_unit(UnitShape::compact(cores), &[(id, Allocation::FullNode)])?;
        Ok(1)
    }
}

impl Scheduler for RanksCoscheduler {
    fn name(&self) -> &str {
        "Ranks"
    }

    fn backfill_enabled(&self) -> bool {
        true
    }

    fn setup(&mut self, _cluster: &ClusterState) {
        self.ranks.clear();
    }

    fn submit(&mut self, cluster: &mut ClusterState) -> Result<SubmissionResult> {
        let mut placed = self.fill_units(cluster)?;

        self.update_ranks(cluster.waiting());
        placed += self.deploy_compact(cluster)?;
        placed += self.deploy_groups(cluster)?;

        if placed == 0 {
            placed += self.unblock(cluster)?;
        }

        Ok(SubmissionResult::from_placed(placed))
    }
}
