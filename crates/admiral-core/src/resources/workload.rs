use super::flavor::default_api_version;
use super::{validate_base, Resource};
use crate::{AdmiralError, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta, Time};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Condition type set once the workload holds quota
pub const CONDITION_ADMITTED: &str = "Admitted";
/// Condition type set once the workload ran to completion
pub const CONDITION_FINISHED: &str = "Finished";

/// A replicated group of identical pods
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSet {
    pub name: String,
    #[serde(default = "default_count")]
    pub count: i32,
    pub spec: PodSpec,
}

fn default_count() -> i32 {
    1
}

/// Flavor chosen for each resource of one pod set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSetFlavors {
    pub name: String,
    /// resource name -> flavor name
    pub flavors: BTreeMap<String, String>,
}

/// Record of where a workload was admitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub cluster_queue: String,
    pub pod_set_flavors: Vec<PodSetFlavors>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// LocalQueue in the workload's namespace
    pub queue_name: String,
    pub pod_sets: Vec<PodSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission: Option<Admission>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    /// Append-ordered by first occurrence of each type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A batch job's resource request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: default_api_version(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            spec: WorkloadSpec {
                queue_name: queue_name.into(),
                pod_sets: Vec::new(),
                admission: None,
            },
            status: WorkloadStatus::default(),
        }
    }

    pub fn with_pod_set(mut self, name: impl Into<String>, count: i32, spec: PodSpec) -> Self {
        self.spec.pod_sets.push(PodSet {
            name: name.into(),
            count,
            spec,
        });
        self
    }

    pub fn with_creation_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.metadata.creation_timestamp = Some(Time(ts));
        self
    }

    pub fn with_admission(mut self, admission: Admission) -> Self {
        self.spec.admission = Some(admission);
        self
    }

    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Whether the given condition type is present with status "True"
    pub fn has_condition(&self, type_: &str) -> bool {
        self.condition(type_).is_some_and(|c| c.status == "True")
    }

    pub fn is_finished(&self) -> bool {
        self.has_condition(CONDITION_FINISHED)
    }

    /// Set a condition, replacing an existing entry of the same type in
    /// place or appending a new one.
    ///
    /// The transition time only moves when the status changes.
    pub fn set_condition(
        &mut self,
        type_: &str,
        status: &str,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) {
        let generation = self.metadata.generation;
        let conditions = &mut self.status.conditions;
        match conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status.to_string();
                    existing.last_transition_time = Time(now);
                }
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                existing.observed_generation = generation;
            }
            None => conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Time(now),
                observed_generation: generation,
            }),
        }
    }
}

impl Resource for Workload {
    fn kind(&self) -> &'static str {
        "Workload"
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> Result<()> {
        validate_base(self.kind(), &self.metadata, true)?;

        if self.spec.pod_sets.is_empty() {
            return Err(AdmiralError::validation_failed(
                self.kind(),
                "Workload must have at least one pod set",
                "Add a pod set to spec.podSets",
            ));
        }

        let mut names = HashSet::new();
        for ps in &self.spec.pod_sets {
            if !names.insert(ps.name.as_str()) {
                return Err(AdmiralError::validation_failed(
                    self.kind(),
                    format!("Duplicate pod set name: {}", ps.name),
                    "Give every pod set a unique name",
                ));
            }
            if ps.count < 1 {
                return Err(AdmiralError::validation_failed(
                    self.kind(),
                    format!("Pod set {} has count {}", ps.name, ps.count),
                    "Pod set count must be at least 1",
                ));
            }
        }

        Ok(())
    }
}
