//! Per-run results

use serde::{Deserialize, Serialize};

use cosched_core::{Job, JobId};

use crate::cluster::ClusterState;

/// Outcome of one finished job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub processes: u32,
    pub arrival_time: f64,
    pub start_time: Option<f64>,
    pub finish_time: Option<f64>,
    pub waiting_time: f64,
    pub binded_cores: u32,
    /// Speedup the job was running at when it finished
    pub final_speedup: f64,
}

impl JobRecord {
    /// Finish minus arrival
    pub fn turnaround(&self) -> Option<f64> {
        self.finish_time.map(|finish| finish - self.arrival_time)
    }
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        JobRecord {
            id: job.id,
            name: job.name.clone(),
            processes: job.processes,
            arrival_time: job.arrival_time,
            start_time: job.start_time,
            finish_time: job.finish_time,
            waiting_time: job.waiting_time,
            binded_cores: job.binded_cores,
            final_speedup: job.current_speedup(),
        }
    }
}

/// Results of one scheduler run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub scheduler: String,
    pub policy: String,
    pub nodes: u32,
    pub cores_per_node: u32,
    pub makespan: f64,
    /// Completion order
    pub finished_jobs: Vec<JobId>,
    /// Sorted by job id
    pub jobs: Vec<JobRecord>,
    pub mean_waiting_time: f64,
    pub mean_turnaround: f64,
    /// Baseline makespan divided by this run's makespan
    pub makespan_speedup: Option<f64>,
}

impl SimulationReport {
    pub fn new(scheduler: &str, policy: &str, cluster: &ClusterState) -> Self {
        let mut jobs: Vec<JobRecord> = cluster.completed_jobs().iter().map(JobRecord::from).collect();
        jobs.sort_by_key(|record| record.id);

        let count = jobs.len().max(1) as f64;
        let mean_waiting_time = jobs.iter().map(|j| j.waiting_time).sum::<f64>() / count;
        let mean_turnaround = jobs.iter().filter_map(JobRecord::turnaround).sum::<f64>() / count;

        SimulationReport {
            scheduler: scheduler.to_string(),
            policy: policy.to_string(),
            nodes: cluster.nodes(),
            cores_per_node: cluster.cores_per_node(),
            makespan: cluster.makespan(),
            finished_jobs: cluster.finished_jobs().to_vec(),
            jobs,
            mean_waiting_time,
            mean_turnaround,
            makespan_speedup: None,
        }
    }

    /// Jobs that ran at a speedup above 1.0
    pub fn accelerated_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| j.final_speedup > 1.0).count()
    }
}

/// Fill in each report's makespan speedup relative to the first one
pub fn compare_to_baseline(reports: &mut [SimulationReport]) {
    let Some(baseline) = reports.first().map(|r| r.makespan) else {
        return;
    };
    for report in reports.iter_mut() {
        report.makespan_speedup = (report.makespan > 0.0).then(|| baseline / report.makespan);
    }
}
