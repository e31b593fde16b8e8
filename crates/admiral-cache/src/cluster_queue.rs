use crate::assignment::Assignment;
use admiral_core::resources::quantities::parse_quantity;
use admiral_core::{AdmiralError, ClusterQueue, ObjectKey, QueueingStrategy, Resource, Result};
use std::collections::{BTreeMap, HashMap};

/// Usage counters, resource name -> flavor name -> quantity
pub type Usage = BTreeMap<String, BTreeMap<String, i64>>;

/// Add `qty` to the (resource, flavor) counter, saturating at `i64::MAX`
pub fn usage_add(usage: &mut Usage, resource: &str, flavor: &str, qty: i64) {
    let counter = usage
        .entry(resource.to_string())
        .or_default()
        .entry(flavor.to_string())
        .or_insert(0);
    *counter = counter.saturating_add(qty);
}

/// Read a (resource, flavor) counter, zero when absent
pub fn usage_get(usage: &Usage, resource: &str, flavor: &str) -> i64 {
    usage
        .get(resource)
        .and_then(|f| f.get(flavor))
        .copied()
        .unwrap_or(0)
}

/// Quota of one flavor, in scalar units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorLimits {
    pub name: String,
    pub min: i64,
    pub max: Option<i64>,
}

/// A resource with its flavors in declared order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuota {
    pub name: String,
    pub flavors: Vec<FlavorLimits>,
}

/// Validated, immutable configuration of a ClusterQueue
///
/// Replaced wholesale on update; readers holding an older `Arc` keep a
/// consistent view.
#[derive(Debug, Clone)]
pub struct ClusterQueueConfig {
    pub name: String,
    pub cohort: Option<String>,
    pub strategy: QueueingStrategy,
    /// Bumped on every accepted update
    pub generation: u64,
    pub resources: Vec<ResourceQuota>,
    /// Indices into `resources` that must share a flavor
    pub codependent: Vec<Vec<usize>>,
}

impl ClusterQueueConfig {
    /// Validate and compile a ClusterQueue object
    pub fn compile(cq: &ClusterQueue, generation: u64) -> Result<Self> {
        cq.validate()?;
        let codependent = cq.codependent_groups()?;

        let mut resources = Vec::with_capacity(cq.spec.resources.len());
        for resource in &cq.spec.resources {
            let mut flavors = Vec::with_capacity(resource.flavors.len());
            for flavor in &resource.flavors {
                let min = parse_quantity(&resource.name, &flavor.min).map_err(|e| {
                    AdmiralError::invalid_spec(format!("ClusterQueue/{}", cq.name()), e, "Fix the quota quantity")
                })?;
                let max = match &flavor.max {
                    Some(q) => Some(parse_quantity(&resource.name, q).map_err(|e| {
                        AdmiralError::invalid_spec(format!("ClusterQueue/{}", cq.name()), e, "Fix the quota quantity")
                    })?),
                    None => None,
                };
                flavors.push(FlavorLimits {
                    name: flavor.name.clone(),
                    min,
                    max,
                });
            }
            resources.push(ResourceQuota {
                name: resource.name.clone(),
                flavors,
            });
        }

        Ok(Self {
            name: cq.name().to_string(),
            cohort: cq.spec.cohort.clone(),
            strategy: cq.spec.queueing_strategy,
            generation,
            resources,
            codependent,
        })
    }

    pub fn resource_index(&self, name: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.name == name)
    }

    /// Limits for a (resource, flavor) pair declared by this queue
    pub fn limits(&self, resource: &str, flavor: &str) -> Option<&FlavorLimits> {
        self.resources
            .iter()
            .find(|r| r.name == resource)
            .and_then(|r| r.flavors.iter().find(|f| f.name == flavor))
    }

    /// Resources that must share a flavor with the resource at `index`,
    /// including itself
    pub fn codependent_with(&self, index: usize) -> &[usize] {
        self.codependent
            .iter()
            .find(|g| g.contains(&index))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every flavor name referenced by this queue
    pub fn flavor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .resources
            .iter()
            .flat_map(|r| r.flavors.iter().map(|f| f.name.as_str()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Live state of a ClusterQueue inside its quota group
#[derive(Debug, Clone)]
pub struct ClusterQueueState {
    pub config: std::sync::Arc<ClusterQueueConfig>,
    /// Total usage per (resource, flavor)
    pub usage: Usage,
    /// Admitted workloads and the assignment charged for each
    pub workloads: HashMap<ObjectKey, Assignment>,
}

impl ClusterQueueState {
    pub fn new(config: std::sync::Arc<ClusterQueueConfig>) -> Self {
        Self {
            config,
            usage: Usage::new(),
            workloads: HashMap::new(),
        }
    }

    pub fn used(&self, resource: &str, flavor: &str) -> i64 {
        usage_get(&self.usage, resource, flavor)
    }

    /// Portion of usage above the queue's own min
    pub fn borrowing(&self, resource: &str, flavor: &str) -> i64 {
        let min = self
            .config
            .limits(resource, flavor)
            .map(|l| l.min)
            .unwrap_or(0);
        (self.used(resource, flavor) - min).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admiral_core::{FlavorQuota, ResourceSpec};

    fn make_cq() -> ClusterQueue {
        ClusterQueue::new("cq")
            .with_cohort("research")
            .with_strategy(QueueingStrategy::StrictFIFO)
            .with_resource(ResourceSpec::new(
                "cpu",
                vec![
                    FlavorQuota::new("spot", "10").with_max("20"),
                    FlavorQuota::new("on-demand", "500m"),
                ],
            ))
            .with_resource(ResourceSpec::new(
                "memory",
                vec![FlavorQuota::new("spot", "1Gi"), FlavorQuota::new("on-demand", "1Gi")],
            ))
    }

    #[test]
    fn test_compile_parses_quotas() {
        let config = ClusterQueueConfig::compile(&make_cq(), 1).unwrap();
        assert_eq!(config.name, "cq");
        assert_eq!(config.cohort.as_deref(), Some("research"));
        assert_eq!(config.strategy, QueueingStrategy::StrictFIFO);

        let spot = config.limits("cpu", "spot").unwrap();
        assert_eq!(spot.min, 10_000);
        assert_eq!(spot.max, Some(20_000));
        assert_eq!(config.limits("cpu", "on-demand").unwrap().min, 500);
        assert_eq!(config.limits("memory", "spot").unwrap().min, 1 << 30);
        assert!(config.limits("gpu", "spot").is_none());
    }

    #[test]
    fn test_codependent_with() {
        let config = ClusterQueueConfig::compile(&make_cq(), 1).unwrap();
        assert_eq!(config.codependent_with(0), &[0, 1]);
        assert_eq!(config.codependent_with(1), &[0, 1]);
        assert_eq!(config.flavor_names(), vec!["on-demand", "spot"]);
    }

    #[test]
    fn test_borrowing_derived_from_min() {
        let config = ClusterQueueConfig::compile(&make_cq(), 1).unwrap();
        let mut state = ClusterQueueState::new(std::sync::Arc::new(config));
        usage_add(&mut state.usage, "cpu", "spot", 12_000);
        assert_eq!(state.used("cpu", "spot"), 12_000);
        assert_eq!(state.borrowing("cpu", "spot"), 2_000);
        assert_eq!(state.borrowing("cpu", "on-demand"), 0);
    }
}
