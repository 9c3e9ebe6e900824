//! Cosched Simulation Engine CLI
//!
//! Runs every configured scheduler over the same workload and prints a comparison

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cosched_simulation_engine::{
    config::{SimConfig, WorkloadSource},
    workload::Workload,
    policies::PolicyKind,
    report::{SimulationReport, compare_to_baseline},
    scheduler::SchedulerSpec,
    simulate,
};

#[derive(Parser, Debug)]
#[command(name = "cosched-sim")]
#[command(about = "Simulate co-scheduling policies on an HPC cluster", long_about = None)]
struct Args {
    /// JSON configuration file (flags below override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of compute nodes
    #[arg(long)]
    nodes: Option<u32>,

    /// Cores per node (must be even)
    #[arg(long)]
    cores_per_node: Option<u32>,

    /// Schedulers to compare (comma-separated: fifo,easy,ranks)
    #[arg(short, long)]
    schedulers: Option<String>,

    /// Cluster policy (exhaustive or shallow)
    #[arg(short, long)]
    policy: Option<PolicyKind>,

    /// Workload trace file, replaces the generated workload
    #[arg(short, long)]
    trace: Option<PathBuf>,

    /// Number of generated jobs
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Seed for the workload generator
    #[arg(long)]
    seed: Option<u64>,

    /// Mean seconds between generated arrivals (0 releases every job at once)
    #[arg(long)]
    mean_inter_arrival: Option<f64>,

    /// Output JSON file path (optional)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the materialized workload as a trace file
    #[arg(long)]
    save_workload: Option<PathBuf>,

    /// Write the effective configuration (after flag overrides)
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG (e.g. "debug", "cosched_simulation_engine=trace")
    #[arg(long)]
    log_level: Option<String>,
}

/// Files the run writes besides stdout
struct Outputs {
    results: Option<PathBuf>,
    workload: Option<PathBuf>,
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<(SimConfig, Outputs)> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => SimConfig::default(),
        };

        if let Some(nodes) = self.nodes {
            config.cluster.nodes = nodes;
        }
        if let Some(cores) = self.cores_per_node {
            config.cluster.cores_per_node = cores;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(list) = &self.schedulers {
            config.schedulers = list
                .split(',')
                .map(str::parse::<SchedulerSpec>)
                .collect::<Result<_, _>>()?;
        }

        if let Some(path) = self.trace {
            config.workload = WorkloadSource::Trace { path };
        } else if let WorkloadSource::Generate {
            jobs,
            seed,
            mean_inter_arrival,
            ..
        } = &mut config.workload
        {
            if let Some(count) = self.jobs {
                *jobs = count;
            }
            if let Some(value) = self.seed {
                *seed = value;
            }
            if let Some(value) = self.mean_inter_arrival {
                *mean_inter_arrival = value;
            }
        }

        config.validate()?;
        let outputs = Outputs {
            results: self.output,
            workload: self.save_workload,
            config: self.save_config,
        };
        Ok((config, outputs))
    }
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level)
            .unwrap_or_else(|_| "cosched=info".into()),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "cosched=info".into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_results(reports: &[SimulationReport]) {
    println!("\n╔══════════════════════════════════════════════════════════╗");
    println!("║  Simulation Results                                      ║");
    println!("╚══════════════════════════════════════════════════════════╝\n");

    println!(
        "{:<12} {:>12} {:>10} {:>14} {:>14} {:>12} {:>10}",
        "Scheduler", "Makespan (s)", "Finished", "Avg Wait (s)", "Avg Turn (s)", "Accelerated", "Speedup"
    );
    println!("{}", "-".repeat(90));

    for report in reports {
        let speedup = report
            .makespan_speedup
            .map(|s| format!("{s:.3}x"))
            .unwrap_or_else(|| "N/A".to_string());

        println!(
            "{:<12} {:>12.1} {:>10} {:>14.1} {:>14.1} {:>12} {:>10}",
            report.scheduler,
            report.makespan,
            report.finished_jobs.len(),
            report.mean_waiting_time,
            report.mean_turnaround,
            report.accelerated_jobs(),
            speedup,
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let (config, outputs) = args.into_config()?;
    if let Some(path) = &outputs.config {
        config
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Configuration saved");
    }

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║  Cosched Simulation Engine                               ║");
    println!("╚══════════════════════════════════════════════════════════╝\n");

    println!("Configuration:");
    println!(
        "  Cluster: {} nodes x {} cores",
        config.cluster.nodes, config.cluster.cores_per_node
    );
    println!("  Policy: {:?}", config.policy);
    if let Some(capacity) = config.cluster.queue_capacity {
        println!("  Queue capacity: {capacity}");
    }

    let workload = Workload {
        jobs: config.workload.descriptors().context("failed to load workload")?,
    };
    if let Some(path) = &outputs.workload {
        workload
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Workload trace saved");
    }
    let jobs = workload.into_jobs();
    println!("  Jobs: {}\n", jobs.len());

    let mut reports = Vec::new();
    let mut failures = 0;

    for spec in &config.schedulers {
        print!("Running simulation with {} scheduler... ", spec.label());

        match simulate(&config, spec, jobs.clone()) {
            Ok(report) => {
                println!("Done");
                reports.push(report);
            }
            Err(err) => {
                println!("Failed");
                error!(scheduler = spec.label(), "{err}");
                failures += 1;
            }
        }
    }

    compare_to_baseline(&mut reports);
    print_results(&reports);

    if let Some(path) = outputs.results {
        println!("\nWriting results to {}...", path.display());
        let json = serde_json::to_string_pretty(&reports)?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), reports = reports.len(), "Results saved");
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} simulations failed", config.schedulers.len());
    }

    println!("\n✅ Simulation complete!\n");
    Ok(())
}
