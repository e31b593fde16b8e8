use admiral_cache::{Cache, FlavorUsage};
use admiral_queue::Manager;
use serde::Serialize;
use std::collections::BTreeMap;

/// Status of one cluster queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueueStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
    pub pending_workloads: usize,
    pub admitted_workloads: usize,
    pub usage: Vec<FlavorUsage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_flavors: Vec<String>,
}

/// Read-only status of every cluster queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub cluster_queues: BTreeMap<String, ClusterQueueStatus>,
    /// Pending workloads whose local or cluster queue is missing
    pub unqueued_workloads: usize,
}

impl StatusReport {
    /// Combine cache counters with queue lengths
    pub fn collect(cache: &Cache, queues: &Manager, unqueued_workloads: usize) -> Self {
        let snapshot = cache.snapshot();
        let pending = queues.pending_counts();

        let mut cluster_queues = BTreeMap::new();
        for (name, usage) in snapshot.cluster_queues {
            cluster_queues.insert(
                name.clone(),
                ClusterQueueStatus {
                    cohort: usage.cohort,
                    pending_workloads: pending.get(&name).copied().unwrap_or(0),
                    admitted_workloads: usage.admitted_workloads,
                    usage: usage.usage,
                    missing_flavors: usage.missing_flavors,
                },
            );
        }

        Self {
            cluster_queues,
            unqueued_workloads,
        }
    }

    pub fn total_pending(&self) -> usize {
        self.cluster_queues
            .values()
            .map(|cq| cq.pending_workloads)
            .sum::<usize>()
            + self.unqueued_workloads
    }
}
