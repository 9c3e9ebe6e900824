//! Cosched Simulation Engine
//!
//! Discrete-event simulator for comparing co-scheduling policies on an HPC
//! cluster. Jobs co-located in an execution unit slow each other down or
//! speed each other up according to measured speedup tables; the engine
//! advances time event by event and records every job's fate.
//!
//! - `cluster`: engine state, placement operations and the step loop
//! - `policies`: time advance and resource release
//! - `scheduler` / `schedulers`: FIFO, EASY backfilling and the ranks co-scheduler
//! - `workload`: JSON traces and seeded synthetic generation
//! - `config`: JSON run configuration
//! - `report`: per-run results

pub mod cluster;
pub mod config;
pub mod error;
pub mod policies;
pub mod report;
pub mod scheduler;
pub mod schedulers;
pub mod workload;

use cosched_core::Job;

use crate::cluster::Cluster;
use crate::config::SimConfig;
use crate::error::Result;
use crate::report::SimulationReport;
use crate::scheduler::SchedulerSpec;

/// Run one scheduler over a workload on a fresh cluster
pub fn simulate(config: &SimConfig, spec: &SchedulerSpec, jobs: Vec<Job>) -> Result<SimulationReport> {
    let mut cluster = Cluster::from_config(config, spec)?;
    cluster.preload(jobs)?;
    cluster.setup();
    Ok(cluster.run()?)
}
