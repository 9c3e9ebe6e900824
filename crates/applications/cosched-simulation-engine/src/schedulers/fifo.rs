use tracing::trace;

use cosched_core::{Allocation, Result, UnitShape};

use crate::cluster::ClusterState;
use crate::scheduler::{Scheduler, SubmissionResult};

/// First-In-First-Out: place the head of the queue compactly while it fits
pub struct FifoScheduler;

impl FifoScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FifoScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for FifoScheduler {
    fn name(&self) -> &str {
        "FIFO"
    }

    fn submit(&mut self, cluster: &mut ClusterState) -> Result<SubmissionResult> {
        let mut placed = 0;

        while let Some(head) = cluster.waiting().first() {
            let (id, cores) = (head.id, head.full_node_cores());
            if cores > cluster.free_cores() {
                trace!(job = id, cores, free = cluster.free_cores(), "Queue head blocked");
                break;
            }
            cluster.deploy_unit(UnitShape::compact(cores), &[(id, Allocation::FullNode)])?;
            placed += 1;
        }

        Ok(SubmissionResult::from_placed(placed))
    }
}
