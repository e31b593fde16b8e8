use serde::Serialize;
use std::collections::BTreeMap;

/// Usage of one (resource, flavor) pair of a cluster queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlavorUsage {
    pub resource: String,
    pub flavor: String,
    pub total: i64,
    pub borrowing: i64,
    pub min: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

/// Point-in-time counters of one cluster queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueueUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
    pub generation: u64,
    pub admitted_workloads: usize,
    pub usage: Vec<FlavorUsage>,
    /// Referenced flavors that are not registered
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_flavors: Vec<String>,
}

impl ClusterQueueUsage {
    pub fn flavor(&self, resource: &str, flavor: &str) -> Option<&FlavorUsage> {
        self.usage
            .iter()
            .find(|u| u.resource == resource && u.flavor == flavor)
    }
}

/// Read-only copy of every quota counter in the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub cluster_queues: BTreeMap<String, ClusterQueueUsage>,
}

impl CacheSnapshot {
    pub fn cluster_queue(&self, name: &str) -> Option<&ClusterQueueUsage> {
        self.cluster_queues.get(name)
    }

    /// `total` of a (resource, flavor) pair, zero if unknown
    pub fn total(&self, cluster_queue: &str, resource: &str, flavor: &str) -> i64 {
        self.cluster_queue(cluster_queue)
            .and_then(|cq| cq.flavor(resource, flavor))
            .map_or(0, |u| u.total)
    }
}
