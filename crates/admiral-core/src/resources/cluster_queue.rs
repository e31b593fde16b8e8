use super::flavor::default_api_version;
use super::quantities::parse_quantity;
use super::{validate_base, Resource};
use crate::{AdmiralError, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// How an unadmittable head affects the rest of a cluster queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueingStrategy {
    /// The oldest workload blocks every younger one until it is admitted or removed
    StrictFIFO,
    /// Younger workloads may be admitted while an older one does not fit
    #[default]
    BestEffortFIFO,
}

impl fmt::Display for QueueingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueingStrategy::StrictFIFO => write!(f, "StrictFIFO"),
            QueueingStrategy::BestEffortFIFO => write!(f, "BestEffortFIFO"),
        }
    }
}

/// Quota of one flavor for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlavorQuota {
    /// ResourceFlavor name
    pub name: String,
    /// Quota guaranteed to this cluster queue
    pub min: Quantity,
    /// Upper bound including borrowed quota; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Quantity>,
}

impl FlavorQuota {
    pub fn new(name: impl Into<String>, min: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min: Quantity(min.into()),
            max: None,
        }
    }

    pub fn with_max(mut self, max: impl Into<String>) -> Self {
        self.max = Some(Quantity(max.into()));
        self
    }
}

/// A resource and its flavors in order of preference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub flavors: Vec<FlavorQuota>,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, flavors: Vec<FlavorQuota>) -> Self {
        Self {
            name: name.into(),
            flavors,
        }
    }

    /// Flavor names in declared order
    pub fn flavor_names(&self) -> Vec<&str> {
        self.flavors.iter().map(|f| f.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueueSpec {
    /// Cohort whose members lend each other unused quota
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
    #[serde(default)]
    pub queueing_strategy: QueueingStrategy,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// A named quota container with per-resource, per-flavor min/max
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueue {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterQueueSpec,
}

impl ClusterQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            spec: ClusterQueueSpec::default(),
        }
    }

    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.spec.cohort = Some(cohort.into());
        self
    }

    pub fn with_strategy(mut self, strategy: QueueingStrategy) -> Self {
        self.spec.queueing_strategy = strategy;
        self
    }

    pub fn with_resource(mut self, resource: ResourceSpec) -> Self {
        self.spec.resources.push(resource);
        self
    }

    /// Group resource indices whose flavor lists are identical.
    ///
    /// Fails if two resources share some flavor names without declaring the
    /// exact same list in the same order.
    pub fn codependent_groups(&self) -> Result<Vec<Vec<usize>>> {
        let resources = &self.spec.resources;
        let mut groups: Vec<Vec<usize>> = Vec::new();

        for (i, resource) in resources.iter().enumerate() {
            let names = resource.flavor_names();
            let mut placed = false;

            for group in groups.iter_mut() {
                let other = &resources[group[0]];
                let other_names = other.flavor_names();
                if names == other_names {
                    group.push(i);
                    placed = true;
                    break;
                }
                if names.iter().any(|n| other_names.contains(n)) {
                    return Err(AdmiralError::invalid_spec(
                        format!("ClusterQueue/{}", self.name()),
                        format!(
                            "resources {} and {} share flavors but declare different flavor lists",
                            other.name, resource.name
                        ),
                        "Resources that share a flavor must list the same flavors in the same order",
                    ));
                }
            }

            if !placed {
                groups.push(vec![i]);
            }
        }

        Ok(groups)
    }

    fn invalid(&self, reason: impl Into<String>, suggestion: impl Into<String>) -> AdmiralError {
        AdmiralError::invalid_spec(format!("ClusterQueue/{}", self.name()), reason, suggestion)
    }
}

impl Resource for ClusterQueue {
    fn kind(&self) -> &'static str {
        "ClusterQueue"
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn is_namespaced(&self) -> bool {
        false
    }

    fn validate(&self) -> Result<()> {
        validate_base(self.kind(), &self.metadata, false)?;

        if let Some(cohort) = &self.spec.cohort {
            if !super::is_valid_name(cohort) {
                return Err(self.invalid(
                    format!("invalid cohort name {}", cohort),
                    "Cohort names must be lowercase alphanumeric, '-', or '.'",
                ));
            }
        }

        let mut seen_resources = HashSet::new();
        for resource in &self.spec.resources {
            if resource.name.is_empty() || !seen_resources.insert(resource.name.as_str()) {
                return Err(self.invalid(
                    format!("resource name '{}' is empty or repeated", resource.name),
                    "Declare each resource once",
                ));
            }
            if resource.flavors.is_empty() {
                return Err(self.invalid(
                    format!("resource {} has no flavors", resource.name),
                    "List at least one flavor per resource",
                ));
            }

            let mut seen_flavors = HashSet::new();
            for flavor in &resource.flavors {
                if !seen_flavors.insert(flavor.name.as_str()) {
                    return Err(self.invalid(
                        format!("flavor {} repeated for resource {}", flavor.name, resource.name),
                        "List each flavor once per resource",
                    ));
                }

                let min = parse_quantity(&resource.name, &flavor.min).map_err(|e| {
                    self.invalid(
                        format!("min of {}/{}: {}", resource.name, flavor.name, e),
                        "Use a quantity such as \"10\", \"500m\" or \"8Gi\"",
                    )
                })?;
                if let Some(max) = &flavor.max {
                    let max = parse_quantity(&resource.name, max).map_err(|e| {
                        self.invalid(
                            format!("max of {}/{}: {}", resource.name, flavor.name, e),
                            "Use a quantity such as \"10\", \"500m\" or \"8Gi\"",
                        )
                    })?;
                    if max < min {
                        return Err(self.invalid(
                            format!("max is below min for {}/{}", resource.name, flavor.name),
                            "Set max to at least min, or leave it unset",
                        ));
                    }
                }
            }
        }

        self.codependent_groups()?;
        Ok(())
    }
}
