//! Cluster engine: queues, execution units and the simulation step loop
//!
//! Jobs flow preloaded → waiting → execution units → finished. The engine
//! owns every job once it is preloaded. Schedulers only see borrowed views
//! and mutate state through `deploy_unit` / `place_in_unit`, which keep the
//! free-core accounting intact.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, trace};

use cosched_core::{
    Allocation, ExecutionUnit, Job, JobId, Phase, Result, SimError, UnitId, UnitShape,
};

use crate::config::SimConfig;
use crate::policies::ClusterPolicy;
use crate::report::SimulationReport;
use crate::scheduler::{Scheduler, SchedulerSpec};

/// Caller-level guards around the step loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    pub max_steps: Option<u64>,
    pub max_makespan: Option<f64>,
}

/// Queue contents captured when a run aborts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub preloaded: Vec<JobId>,
    pub waiting: Vec<JobId>,
    /// Slot occupancy per unit, `None` for empty slots
    pub units: Vec<(UnitId, Vec<Option<JobId>>)>,
    pub finished: usize,
    pub free_cores: u32,
}

/// Fatal error together with the state it was raised in
#[derive(Debug, Clone, Error)]
#[error("simulation aborted at makespan {makespan}s during {phase}: {error}")]
pub struct SimulationFailure {
    pub error: SimError,
    pub makespan: f64,
    pub phase: Phase,
    pub snapshot: QueueSnapshot,
}

/// What one call to `Cluster::step` did
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The scheduler placed jobs and backfilling asked for another pass
    Rescheduled,
    /// Simulated time moved forward
    Advanced { step: f64, finished: Vec<JobId> },
}

/// Engine-owned cluster state: resources, queues and execution units
#[derive(Debug, Clone)]
pub struct ClusterState {
    nodes: u32,
    cores_per_node: u32,
    total_cores: u32,
    pub(crate) free_cores: u32,
    queue_capacity: Option<usize>,

    pub(crate) makespan: f64,
    id_counter: JobId,
    next_unit_id: u64,

    pub(crate) preloaded: Vec<Job>,
    pub(crate) waiting: Vec<Job>,
    pub(crate) units: Vec<ExecutionUnit>,
    pub(crate) finished_jobs: Vec<JobId>,
    pub(crate) completed: Vec<Job>,
}

impl ClusterState {
    /// Empty cluster of `nodes` nodes with `cores_per_node` cores each
    ///
    /// Half-node binding needs an even, positive core count per node.
    pub fn new(nodes: u32, cores_per_node: u32) -> Result<Self> {
        if nodes == 0 {
            return Err(SimError::config("cluster needs at least one node"));
        }
        if cores_per_node == 0 || cores_per_node % 2 != 0 {
            return Err(SimError::config(format!(
                "cores_per_node must be positive and even, got {cores_per_node}"
            )));
        }
        let total_cores = nodes
            .checked_mul(cores_per_node)
            .ok_or_else(|| SimError::config("total core count overflows"))?;

        Ok(ClusterState {
            nodes,
            cores_per_node,
            total_cores,
            free_cores: total_cores,
            queue_capacity: None,
            makespan: 0.0,
            id_counter: 0,
            next_unit_id: 0,
            preloaded: Vec::new(),
            waiting: Vec::new(),
            units: Vec::new(),
            finished_jobs: Vec::new(),
            completed: Vec::new(),
        })
    }

    /// Bound the waiting queue; arrivals beyond it stay preloaded
    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Reset resources and clocks for a fresh run
    ///
    /// Preloaded and waiting jobs are kept; running and finished state is dropped.
    pub fn setup(&mut self) {
        self.free_cores = self.total_cores;
        self.makespan = 0.0;
        self.units.clear();
        self.finished_jobs.clear();
        self.completed.clear();
    }

    pub fn nodes(&self) -> u32 {
        self.nodes
    }

    pub fn cores_per_node(&self) -> u32 {
        self.cores_per_node
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    pub fn free_cores(&self) -> u32 {
        self.free_cores
    }

    pub fn makespan(&self) -> f64 {
        self.makespan
    }

    pub fn preloaded(&self) -> &[Job] {
        &self.preloaded
    }

    pub fn waiting(&self) -> &[Job] {
        &self.waiting
    }

    pub fn waiting_job(&self, id: JobId) -> Option<&Job> {
        self.waiting.iter().find(|job| job.id == id)
    }

    pub fn units(&self) -> &[ExecutionUnit] {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> Option<&ExecutionUnit> {
        self.units.iter().find(|unit| unit.id() == id)
    }

    /// Units whose every slot is occupied
    pub fn filled_units(&self) -> Vec<&ExecutionUnit> {
        self.units.iter().filter(|unit| unit.is_filled()).collect()
    }

    /// Units with at least one empty slot: placement and backfill targets
    pub fn nonfilled_units(&self) -> Vec<&ExecutionUnit> {
        self.units.iter().filter(|unit| !unit.is_filled()).collect()
    }

    pub fn running_jobs(&self) -> impl Iterator<Item = &Job> + '_ {
        self.units.iter().flat_map(|unit| unit.jobs())
    }

    /// Finished job ids in completion order
    pub fn finished_jobs(&self) -> &[JobId] {
        &self.finished_jobs
    }

    /// Finished job records in completion order
    pub fn completed_jobs(&self) -> &[Job] {
        &self.completed
    }

    /// True when nothing is preloaded, waiting or running
    pub fn is_drained(&self) -> bool {
        self.preloaded.is_empty() && self.waiting.is_empty() && self.units.is_empty()
    }

    fn holds_no_jobs(&self) -> bool {
        self.is_drained() && self.completed.is_empty()
    }

    /// Load a workload into the preloaded queue
    ///
    /// Jobs are stable-sorted by arrival time, numbered from the id counter
    /// (restarted at the beginning of a fresh run) and get their footprints.
    pub fn preload(&mut self, mut jobs: Vec<Job>) -> Result<()> {
        for job in &jobs {
            if job.processes == 0 {
                return Err(SimError::config(format!("job '{}' has no processes", job.name)));
            }
            if !(job.remaining_time.is_finite() && job.remaining_time > 0.0) {
                return Err(SimError::config(format!(
                    "job '{}' has invalid runtime {}",
                    job.name, job.remaining_time
                )));
            }
            if !(job.arrival_time.is_finite() && job.arrival_time >= 0.0) {
                return Err(SimError::config(format!(
                    "job '{}' has invalid arrival time {}",
                    job.name, job.arrival_time
                )));
            }
            let need = cosched_core::full_node_cores(job.processes, self.cores_per_node);
            if need > self.total_cores {
                return Err(SimError::CapacityExceeded {
                    need,
                    have: self.total_cores,
                });
            }
        }

        jobs.sort_by(|a, b| a.arrival_time.total_cmp(&b.arrival_time));

        if self.makespan == 0.0 && self.holds_no_jobs() {
            self.id_counter = 0;
        }

        for mut job in jobs {
            job.id = self.id_counter;
            job.derive_footprints(self.cores_per_node);
            self.preloaded.push(job);
            self.id_counter += 1;
        }

        Ok(())
    }

    /// Move every job that has arrived into the waiting queue, keeping order
    pub fn admit_arrivals(&mut self) -> usize {
        let mut admitted = 0;
        let mut still_preloaded = Vec::with_capacity(self.preloaded.len());

        for job in std::mem::take(&mut self.preloaded) {
            let has_room = self
                .queue_capacity
                .map_or(true, |capacity| self.waiting.len() < capacity);

            if job.arrival_time <= self.makespan && has_room {
                trace!(job = job.id, name = %job.name, makespan = self.makespan, "Job arrived");
                self.waiting.push(job);
                admitted += 1;
            } else {
                still_preloaded.push(job);
            }
        }

        self.preloaded = still_preloaded;
        admitted
    }

    /// Open a new execution unit and move the listed waiting jobs into it
    ///
    /// All checks run before anything is mutated; a rejected deployment
    /// leaves the state untouched.
    pub fn deploy_unit(
        &mut self,
        shape: UnitShape,
        members: &[(JobId, Allocation)],
    ) -> Result<UnitId> {
        if members.is_empty() {
            return Err(SimError::accounting("cannot deploy an execution unit without jobs"));
        }
        if members.len() > shape.slots {
            return Err(SimError::CapacityExceeded {
                need: members.len() as u32,
                have: shape.slots as u32,
            });
        }

        let mut seen = HashSet::new();
        let mut need = 0;
        for &(id, allocation) in members {
            if !seen.insert(id) {
                return Err(SimError::DuplicateJob(id));
            }
            let job = self.waiting_job(id).ok_or(SimError::JobNotWaiting(id))?;
            need += job.cores_for(allocation);
        }

        if need > shape.core_capacity {
            return Err(SimError::CapacityExceeded {
                need,
                have: shape.core_capacity,
            });
        }
        if need > self.free_cores {
            return Err(SimError::CapacityExceeded {
                need,
                have: self.free_cores,
            });
        }

        let unit_id = UnitId(self.next_unit_id);
        let mut unit = ExecutionUnit::new(unit_id, shape.slots, shape.core_capacity);

        for &(id, allocation) in members {
            let mut job = self
                .waiting_job(id)
                .cloned()
                .ok_or(SimError::JobNotWaiting(id))?;
            job.binded_cores = job.cores_for(allocation);
            job.start_time = Some(self.makespan);
            unit.insert(job)?;
        }
        unit.resolve_interference()?;

        self.waiting.retain(|job| !seen.contains(&job.id));
        self.free_cores -= need;
        self.next_unit_id += 1;

        debug!(
            unit = %unit_id,
            jobs = ?unit.job_ids(),
            cores = need,
            free_cores = self.free_cores,
            "Deployed execution unit"
        );
        self.units.push(unit);

        Ok(unit_id)
    }

    /// Bind one waiting job into the first empty slot of an existing unit
    pub fn place_in_unit(
        &mut self,
        unit_id: UnitId,
        job_id: JobId,
        allocation: Allocation,
    ) -> Result<()> {
        let unit_idx = self
            .units
            .iter()
            .position(|unit| unit.id() == unit_id)
            .ok_or(SimError::UnitNotFound(unit_id))?;

        let mut job = self
            .waiting_job(job_id)
            .cloned()
            .ok_or(SimError::JobNotWaiting(job_id))?;
        job.binded_cores = job.cores_for(allocation);
        job.start_time = Some(self.makespan);

        let need = job.binded_cores;
        if need > self.free_cores {
            return Err(SimError::CapacityExceeded {
                need,
                have: self.free_cores,
            });
        }

        let mut unit = self.units[unit_idx].clone();
        unit.insert(job)?;
        unit.resolve_interference()?;

        self.units[unit_idx] = unit;
        self.waiting.retain(|job| job.id != job_id);
        self.free_cores -= need;

        trace!(unit = %unit_id, job = job_id, cores = need, "Placed job in execution unit");
        Ok(())
    }

    /// Verify core accounting and queue exclusivity
    pub fn audit(&self) -> Result<()> {
        let bound: u32 = self.units.iter().map(ExecutionUnit::bound_cores).sum();
        let vacated: u32 = self.units.iter().map(ExecutionUnit::vacated_cores).sum();

        if self.free_cores + bound + vacated != self.total_cores {
            return Err(SimError::accounting(format!(
                "free {} + bound {} + vacated {} != total {}",
                self.free_cores, bound, vacated, self.total_cores
            )));
        }

        for unit in &self.units {
            if unit.is_vacant() && unit.vacated_cores() == 0 {
                return Err(SimError::accounting(format!("{} holds no jobs", unit.id())));
            }
            if unit.bound_cores() > unit.core_capacity() {
                return Err(SimError::CapacityExceeded {
                    need: unit.bound_cores(),
                    have: unit.core_capacity(),
                });
            }
            if let Some(job) = unit.jobs().find(|job| !job.is_running()) {
                return Err(SimError::accounting(format!(
                    "job {} occupies {} without running",
                    job.id,
                    unit.id()
                )));
            }
        }

        let mut seen = HashSet::new();
        let ids = self
            .preloaded
            .iter()
            .chain(self.waiting.iter())
            .chain(self.running_jobs())
            .map(|job| job.id);
        for id in ids {
            if !seen.insert(id) {
                return Err(SimError::DuplicateJob(id));
            }
        }

        Ok(())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            preloaded: self.preloaded.iter().map(|job| job.id).collect(),
            waiting: self.waiting.iter().map(|job| job.id).collect(),
            units: self
                .units
                .iter()
                .map(|unit| {
                    let slots = unit.slots().iter().map(|s| s.job().map(|j| j.id)).collect();
                    (unit.id(), slots)
                })
                .collect(),
            finished: self.finished_jobs.len(),
            free_cores: self.free_cores,
        }
    }
}

/// Simulation engine: cluster state driven by a scheduler and a time-advance policy
pub struct Cluster {
    state: ClusterState,
    policy: Box<dyn ClusterPolicy>,
    scheduler: Box<dyn Scheduler>,
    limits: RunLimits,
    phase: Phase,
    admission_due: bool,
    steps: u64,
}

impl Cluster {
    pub fn new(
        state: ClusterState,
        policy: Box<dyn ClusterPolicy>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        Cluster {
            state,
            policy,
            scheduler,
            limits: RunLimits::default(),
            phase: Phase::Idle,
            admission_due: true,
            steps: 0,
        }
    }

    /// Build an isolated engine for one scheduler of a configuration
    pub fn from_config(config: &SimConfig, spec: &SchedulerSpec) -> Result<Self> {
        let state = ClusterState::new(config.cluster.nodes, config.cluster.cores_per_node)?
            .with_queue_capacity(config.cluster.queue_capacity);
        let cluster = Cluster::new(state, config.policy.build(), spec.build()?)
            .with_limits(config.limits);
        Ok(cluster)
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn scheduler_name(&self) -> &str {
        self.scheduler.name()
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn preload(&mut self, jobs: Vec<Job>) -> Result<()> {
        self.state.preload(jobs)?;
        self.admission_due = true;
        Ok(())
    }

    /// Reset the engine for a new run and let the scheduler prepare
    pub fn setup(&mut self) {
        self.state.setup();
        self.phase = Phase::Idle;
        self.admission_due = true;
        self.steps = 0;
        self.scheduler.setup(&self.state);
    }

    /// One pass of the step loop
    pub fn step(&mut self) -> Result<StepOutcome> {
        self.steps += 1;
        if let Some(max) = self.limits.max_steps {
            if self.steps > max {
                return Err(SimError::StepLimitExceeded(max));
            }
        }

        self.phase = Phase::Scheduling;
        if self.admission_due {
            let admitted = self.state.admit_arrivals();
            self.admission_due = false;
            if admitted > 0 {
                debug!(admitted, makespan = self.state.makespan, "Admitted arrivals");
            }
        }

        if !self.state.waiting.is_empty() {
            let result = self.scheduler.submit(&mut self.state)?;
            self.state.audit()?;

            if result.submitted && self.scheduler.backfill_enabled() {
                trace!(placed = result.placed, "Submission succeeded, rescheduling");
                return Ok(StepOutcome::Rescheduled);
            }
        }

        self.phase = Phase::Advancing;
        let advance = self.policy.next_state(&mut self.state)?;
        self.admission_due = true;

        if let Some(max) = self.limits.max_makespan {
            if self.state.makespan > max {
                return Err(SimError::MakespanLimitExceeded(max));
            }
        }

        if !self.state.units.is_empty() {
            self.phase = Phase::Draining;
            let freed = self.policy.free_resources(&mut self.state)?;
            self.state.audit()?;
            if freed > 0 {
                trace!(freed, free_cores = self.state.free_cores, "Released cores");
            }
        }

        self.phase = Phase::Idle;
        Ok(StepOutcome::Advanced {
            step: advance.step,
            finished: advance.finished,
        })
    }

    /// Run the step loop until every queue is empty
    pub fn run(&mut self) -> std::result::Result<SimulationReport, SimulationFailure> {
        info!(
            scheduler = self.scheduler.name(),
            policy = self.policy.name(),
            jobs = self.state.preloaded.len() + self.state.waiting.len(),
            "Starting simulation"
        );

        while !self.state.is_drained() {
            if let Err(err) = self.step() {
                let failure = self.failure(err);
                error!(
                    makespan = failure.makespan,
                    phase = %failure.phase,
                    waiting = failure.snapshot.waiting.len(),
                    running_units = failure.snapshot.units.len(),
                    "Simulation aborted: {}",
                    failure.error
                );
                return Err(failure);
            }
        }

        info!(
            scheduler = self.scheduler.name(),
            makespan = self.state.makespan,
            finished = self.state.finished_jobs.len(),
            steps = self.steps,
            "Simulation finished"
        );

        Ok(SimulationReport::new(
            self.scheduler.name(),
            self.policy.name(),
            &self.state,
        ))
    }

    fn failure(&self, error: SimError) -> SimulationFailure {
        SimulationFailure {
            error,
            makespan: self.state.makespan,
            phase: self.phase,
            snapshot: self.state.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::{ExhaustivePolicy, PolicyKind, ShallowPolicy};
    use crate::scheduler::SubmissionResult;
    use crate::schedulers::{FifoScheduler, Matching, RanksCoscheduler};
    use crate::workload::{LoadCatalog, WorkloadGenerator};
    use cosched_core::SpeedupTable;

    fn table(entries: &[(&str, f64)]) -> SpeedupTable {
        SpeedupTable::new(entries.iter().map(|(n, f)| (n.to_string(), *f)).collect()).unwrap()
    }

    fn job(name: &str, processes: u32, runtime: f64, arrival: f64, speedups: &[(&str, f64)]) -> Job {
        Job::new(name, processes, runtime, arrival, runtime * 1.25, table(speedups))
    }

    /// Places every waiting job together in one unit at half-node binding
    struct PairScheduler;

    impl Scheduler for PairScheduler {
        fn name(&self) -> &str {
            "Pair"
        }

        fn submit(&mut self, cluster: &mut ClusterState) -> Result<SubmissionResult> {
            let members: Vec<(JobId, Allocation)> = cluster
                .waiting()
                .iter()
                .map(|job| (job.id, Allocation::HalfNode))
                .collect();
            let capacity = cluster.waiting().iter().map(|j| j.half_node_cores()).sum();
            cluster.deploy_unit(UnitShape::new(members.len(), capacity), &members)?;
            Ok(SubmissionResult::from_placed(members.len()))
        }
    }

    /// Never places anything
    struct IdleScheduler;

    impl Scheduler for IdleScheduler {
        fn name(&self) -> &str {
            "Idle"
        }

        fn submit(&mut self, _cluster: &mut ClusterState) -> Result<SubmissionResult> {
            Ok(SubmissionResult::none())
        }
    }

    /// Deploys the queue head, then loses track of one free core
    struct LeakyScheduler;

    impl Scheduler for LeakyScheduler {
        fn name(&self) -> &str {
            "Leaky"
        }

        fn submit(&mut self, cluster: &mut ClusterState) -> Result<SubmissionResult> {
            let Some(head) = cluster.waiting().first() else {
                return Ok(SubmissionResult::none());
            };
            let (id, cores) = (head.id, head.full_node_cores());
            cluster.deploy_unit(UnitShape::compact(cores), &[(id, Allocation::FullNode)])?;
            cluster.free_cores -= 1;
            Ok(SubmissionResult::from_placed(1))
        }
    }

    fn cluster(nodes: u32, scheduler: Box<dyn Scheduler>) -> Cluster {
        Cluster::new(
            ClusterState::new(nodes, 20).unwrap(),
            Box::new(ExhaustivePolicy::new()),
            scheduler,
        )
    }

    #[test]
    fn test_single_job_run() {
        let mut sim = cluster(4, Box::new(FifoScheduler::new()));
        sim.preload(vec![job("bt.C", 16, 120.0, 0.0, &[])]).unwrap();
        sim.setup();

        let report = sim.run().unwrap();
        assert_eq!(report.makespan, 120.0);
        assert_eq!(report.finished_jobs, vec![0]);
        assert_eq!(report.jobs[0].waiting_time, 0.0);
        assert_eq!(sim.state().free_cores(), 80);
    }

    #[test]
    fn test_symmetric_pair_finishes_together() {
        let s = 1.25;
        let mut sim = cluster(2, Box::new(PairScheduler));
        sim.preload(vec![
            job("a", 10, 100.0, 0.0, &[("b", s)]),
            job("b", 10, 100.0, 0.0, &[("a", s)]),
        ])
        .unwrap();
        sim.setup();

        // First step places the pair, second advances to the shared finish
        let outcome = sim.step().unwrap();
        assert!(matches!(outcome, StepOutcome::Advanced { .. }));
        let StepOutcome::Advanced { step, finished } = outcome else {
            unreachable!()
        };
        assert!((step - 100.0 / s).abs() < 1e-9);
        assert_eq!(finished, vec![0, 1]);
        assert!(sim.state().is_drained());
        assert!((sim.state().makespan() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_arrival_ties_keep_submission_order() {
        let mut state = ClusterState::new(2, 20).unwrap();
        state
            .preload(vec![
                job("late", 4, 10.0, 5.0, &[]),
                job("first", 4, 10.0, 1.0, &[]),
                job("second", 4, 10.0, 1.0, &[]),
            ])
            .unwrap();

        let names: Vec<&str> = state.preloaded().iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "late"]);
        let ids: Vec<JobId> = state.preloaded().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        state.makespan = 1.0;
        assert_eq!(state.admit_arrivals(), 2);
        let waiting: Vec<&str> = state.waiting().iter().map(|j| j.name.as_str()).collect();
        assert_eq!(waiting, vec!["first", "second"]);
    }

    #[test]
    fn test_id_counter_continues_mid_run() {
        let mut state = ClusterState::new(2, 20).unwrap();
        state.preload(vec![job("a", 4, 10.0, 0.0, &[])]).unwrap();
        state.makespan = 3.0;
        state.preload(vec![job("b", 4, 10.0, 4.0, &[])]).unwrap();
        let ids: Vec<JobId> = state.preloaded().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_queue_capacity_defers_arrivals() {
        let mut state = ClusterState::new(2, 20).unwrap().with_queue_capacity(Some(1));
        state
            .preload(vec![job("a", 4, 10.0, 0.0, &[]), job("b", 4, 10.0, 0.0, &[])])
            .unwrap();
        assert_eq!(state.admit_arrivals(), 1);
        assert_eq!(state.waiting().len(), 1);
        assert_eq!(state.preloaded().len(), 1);
    }

    #[test]
    fn test_deploy_rejects_without_mutation() {
        let mut state = ClusterState::new(1, 20).unwrap();
        state
            .preload(vec![job("a", 16, 10.0, 0.0, &[]), job("b", 16, 10.0, 0.0, &[])])
            .unwrap();
        state.admit_arrivals();

        let err = state
            .deploy_unit(
                UnitShape::new(2, 40),
                &[(0, Allocation::FullNode), (1, Allocation::FullNode)],
            )
            .unwrap_err();
        assert_eq!(err, SimError::CapacityExceeded { need: 40, have: 20 });
        assert_eq!(state.waiting().len(), 2);
        assert_eq!(state.free_cores(), 20);

        assert_eq!(
            state.deploy_unit(UnitShape::compact(20), &[(7, Allocation::FullNode)]),
            Err(SimError::JobNotWaiting(7))
        );
        state.audit().unwrap();
    }

    #[test]
    fn test_cluster_shape_validated() {
        assert!(matches!(ClusterState::new(2, 1), Err(SimError::Config(_))));
        assert!(matches!(ClusterState::new(2, 0), Err(SimError::Config(_))));
        assert!(matches!(ClusterState::new(0, 20), Err(SimError::Config(_))));
        assert!(matches!(ClusterState::new(u32::MAX, 20), Err(SimError::Config(_))));

        let mut state = ClusterState::new(1, 2).unwrap();
        state.preload(vec![job("a", 1, 10.0, 0.0, &[])]).unwrap();
        assert_eq!(state.preloaded()[0].half_node_cores(), 1);
    }

    fn running_single_job() -> ClusterState {
        let mut state = ClusterState::new(2, 20).unwrap();
        state
            .preload(vec![job("a", 20, 10.0, 0.0, &[]), job("b", 20, 10.0, 0.0, &[])])
            .unwrap();
        state.admit_arrivals();
        state
            .deploy_unit(UnitShape::compact(20), &[(0, Allocation::FullNode)])
            .unwrap();
        state.audit().unwrap();
        state
    }

    #[test]
    fn test_audit_detects_core_drift() {
        let mut state = running_single_job();
        state.free_cores += 1;
        assert!(matches!(state.audit(), Err(SimError::AccountingViolation(_))));
    }

    #[test]
    fn test_audit_detects_job_in_two_queues() {
        let mut state = running_single_job();
        let running = state.running_jobs().next().unwrap().clone();
        state.waiting.push(running);
        assert_eq!(state.audit(), Err(SimError::DuplicateJob(0)));
    }

    #[test]
    fn test_broken_accounting_aborts_during_scheduling() {
        let mut sim = cluster(2, Box::new(LeakyScheduler));
        sim.preload(vec![job("a", 20, 10.0, 0.0, &[]), job("b", 20, 10.0, 0.0, &[])])
            .unwrap();
        sim.setup();

        let failure = sim.run().unwrap_err();
        assert!(matches!(failure.error, SimError::AccountingViolation(_)));
        assert_eq!(failure.phase, Phase::Scheduling);
        assert_eq!(failure.makespan, 0.0);
        assert_eq!(failure.snapshot.waiting, vec![1]);
        assert_eq!(failure.snapshot.units.len(), 1);
        assert_eq!(failure.snapshot.units[0].1, vec![Some(0)]);
        assert_eq!(failure.snapshot.free_cores, 19);
    }

    #[test]
    fn test_unknown_partner_rejects_deployment() {
        let mut state = ClusterState::new(1, 20).unwrap();
        state
            .preload(vec![job("a", 8, 10.0, 0.0, &[]), job("b", 8, 10.0, 0.0, &[])])
            .unwrap();
        state.admit_arrivals();

        let result = state.deploy_unit(
            UnitShape::new(2, 20),
            &[(0, Allocation::HalfNode), (1, Allocation::HalfNode)],
        );
        assert!(matches!(result, Err(SimError::UnknownCoJob { .. })));
        assert_eq!(state.waiting().len(), 2);
        assert!(state.units().is_empty());
    }

    #[test]
    fn test_place_in_unit_backfills_empty_slot() {
        let mut state = ClusterState::new(2, 20).unwrap();
        state
            .preload(vec![
                job("a", 20, 100.0, 0.0, &[("b", 0.9), ("c", 1.5)]),
                job("b", 10, 50.0, 0.0, &[("a", 1.1)]),
            ])
            .unwrap();
        state.admit_arrivals();

        let unit = state
            .deploy_unit(UnitShape::new(2, 40), &[(0, Allocation::HalfNode)])
            .unwrap();
        assert_eq!(state.nonfilled_units().len(), 1);
        // Spread: alone beside an empty slot at max speedup
        assert_eq!(state.unit(unit).unwrap().dominant().unwrap().current_speedup(), 1.5);

        state.place_in_unit(unit, 1, Allocation::HalfNode).unwrap();
        assert_eq!(state.filled_units().len(), 1);
        assert!(state.waiting().is_empty());
        assert_eq!(state.free_cores(), 40 - 20 - 10);

        let jobs: Vec<&Job> = state.unit(unit).unwrap().jobs().collect();
        assert_eq!(jobs[0].current_speedup(), 0.9);
        assert_eq!(jobs[1].current_speedup(), 1.1);
        state.audit().unwrap();
    }

    #[test]
    fn test_stall_reports_no_next_event() {
        let mut sim = cluster(1, Box::new(IdleScheduler));
        sim.preload(vec![job("a", 4, 10.0, 0.0, &[])]).unwrap();
        sim.setup();

        let failure = sim.run().unwrap_err();
        assert_eq!(failure.error, SimError::NoNextEvent);
        assert_eq!(failure.phase, Phase::Advancing);
        assert_eq!(failure.snapshot.waiting, vec![0]);
        assert_eq!(failure.makespan, 0.0);
    }

    #[test]
    fn test_step_limit_aborts() {
        let mut sim = cluster(1, Box::new(FifoScheduler::new())).with_limits(RunLimits {
            max_steps: Some(1),
            max_makespan: None,
        });
        sim.preload(vec![job("a", 4, 10.0, 0.0, &[]), job("b", 4, 10.0, 20.0, &[])])
            .unwrap();
        sim.setup();
        let failure = sim.run().unwrap_err();
        assert_eq!(failure.error, SimError::StepLimitExceeded(1));
    }

    #[test]
    fn test_waiting_time_accrues_while_queued() {
        let mut sim = cluster(1, Box::new(FifoScheduler::new()));
        sim.preload(vec![job("a", 20, 30.0, 0.0, &[]), job("b", 20, 10.0, 0.0, &[])])
            .unwrap();
        sim.setup();

        let report = sim.run().unwrap();
        assert_eq!(report.makespan, 40.0);
        assert_eq!(report.finished_jobs, vec![0, 1]);
        assert_eq!(report.jobs[1].waiting_time, 30.0);
    }

    #[test]
    fn test_idle_gap_jumps_to_next_arrival() {
        let mut sim = cluster(1, Box::new(FifoScheduler::new()));
        sim.preload(vec![job("a", 4, 10.0, 0.0, &[]), job("b", 4, 10.0, 50.0, &[])])
            .unwrap();
        sim.setup();

        let report = sim.run().unwrap();
        assert_eq!(report.makespan, 60.0);
        assert_eq!(report.jobs[1].start_time, Some(50.0));
    }

    fn assert_invariants_hold(mut sim: Cluster) {
        let mut last_makespan = 0.0;
        while !sim.state().is_drained() {
            let waiting_before: Vec<(JobId, f64)> =
                sim.state().waiting().iter().map(|j| (j.id, j.waiting_time)).collect();

            sim.step().unwrap();
            let state = sim.state();

            assert!(state.makespan() >= last_makespan);
            last_makespan = state.makespan();

            for (id, before) in waiting_before {
                if let Some(job) = state.waiting_job(id) {
                    assert!(job.waiting_time >= before);
                }
            }
            for job in state.running_jobs() {
                assert!(job.remaining_time >= 0.0);
            }
            let bound: u32 = state.units().iter().map(|u| u.bound_cores()).sum();
            assert_eq!(state.free_cores() + bound, state.total_cores());
            assert!(sim.steps() < 100_000, "step loop did not terminate");
        }
        assert_eq!(sim.state().finished_jobs().len(), 40);
    }

    fn generated_jobs(seed: u64) -> Vec<Job> {
        let mut generator = WorkloadGenerator::new(LoadCatalog::builtin(), seed, 30.0).unwrap();
        generator
            .generate(40)
            .into_iter()
            .map(|descriptor| descriptor.into_job())
            .collect()
    }

    #[test]
    fn test_generated_workloads_keep_invariants() {
        let specs = [
            SchedulerSpec::Fifo,
            SchedulerSpec::Easy,
            SchedulerSpec::Ranks {
                threshold: 1.0,
                ranks_threshold: 1.0,
                matching: Matching::Optimal,
            },
            SchedulerSpec::Ranks {
                threshold: 1.0,
                ranks_threshold: 1.05,
                matching: Matching::FirstFit,
            },
        ];

        for seed in [1, 7, 42] {
            for spec in &specs {
                for policy in [PolicyKind::Exhaustive, PolicyKind::Shallow] {
                    let mut sim =
                        Cluster::new(ClusterState::new(8, 20).unwrap(), policy.build(), spec.build().unwrap());
                    sim.preload(generated_jobs(seed)).unwrap();
                    sim.setup();
                    assert_invariants_hold(sim);
                }
            }
        }
    }

    #[test]
    fn test_shallow_policy_runs_to_completion() {
        let mut sim = Cluster::new(
            ClusterState::new(2, 20).unwrap(),
            Box::new(ShallowPolicy::new()),
            Box::new(PairScheduler),
        );
        sim.preload(vec![
            job("a", 20, 100.0, 0.0, &[("b", 0.5)]),
            job("b", 20, 10.0, 0.0, &[("a", 1.0)]),
        ])
        .unwrap();
        sim.setup();

        let report = sim.run().unwrap();
        // a runs 10s at 0.5 (5s of solo work), then 95s solo after compaction
        assert!((report.makespan - 105.0).abs() < 1e-9);
        assert_eq!(report.finished_jobs, vec![1, 0]);
    }

    #[test]
    fn test_coscheduler_keeps_strangers_apart() {
        // a and b both pair well with h but were never measured together
        let mut sim = cluster(
            4,
            Box::new(RanksCoscheduler::new(1.0, 1.0, Matching::Optimal).unwrap()),
        );
        sim.preload(vec![
            job("h", 40, 10.0, 0.0, &[("a", 1.5), ("b", 1.5)]),
            job("a", 10, 100.0, 0.0, &[("h", 1.5)]),
            job("b", 10, 100.0, 0.0, &[("h", 1.5)]),
        ])
        .unwrap();
        sim.setup();

        let report = sim.run().unwrap();
        assert_eq!(report.finished_jobs.len(), 3);
        assert_eq!(report.finished_jobs[0], 0);
        // b could not join the shared unit and ran on a whole node
        assert_eq!(report.jobs[1].binded_cores, 10);
        assert_eq!(report.jobs[2].binded_cores, 20);
    }

    #[test]
    fn test_coscheduler_pairs_complementary_jobs() {
        let mut sim = cluster(
            1,
            Box::new(RanksCoscheduler::new(1.0, 1.0, Matching::Optimal).unwrap()),
        );
        sim.preload(vec![
            job("cpu", 10, 100.0, 0.0, &[("mem", 1.25)]),
            job("mem", 10, 100.0, 0.0, &[("cpu", 1.25)]),
        ])
        .unwrap();
        sim.setup();

        let report = sim.run().unwrap();
        assert!((report.makespan - 80.0).abs() < 1e-9);
        assert_eq!(report.jobs[0].binded_cores, 10);
        assert_eq!(report.jobs[1].start_time, Some(0.0));
    }
}
