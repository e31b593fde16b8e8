//! Normalized view of a workload used by the cache, queues and scheduler

use crate::resources::quantities::{
    add_requests, max_requests, requests_from_resource_list, scale_requests,
};
use crate::resources::{Requests, Resource, Workload};
use crate::{AdmiralError, ObjectKey, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use std::collections::BTreeMap;

/// Total requests of one pod set, already multiplied by its count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSetRequests {
    pub name: String,
    pub requests: Requests,
    /// Flavors from an existing admission, resource name -> flavor name
    pub flavors: BTreeMap<String, String>,
}

/// A workload with its requests normalized into scalars
#[derive(Debug, Clone)]
pub struct WorkloadInfo {
    pub key: ObjectKey,
    pub uid: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
    /// LocalQueue this workload was submitted to
    pub queue: ObjectKey,
    /// ClusterQueue from an existing admission
    pub cluster_queue: Option<String>,
    pub total_requests: Vec<PodSetRequests>,
    pub obj: Workload,
}

impl WorkloadInfo {
    /// Build the normalized view. Missing creation timestamps default to now.
    pub fn new(workload: &Workload) -> Result<Self> {
        let key = workload.key()?;
        let admission = workload.spec.admission.as_ref();

        let mut total_requests = Vec::with_capacity(workload.spec.pod_sets.len());
        for ps in &workload.spec.pod_sets {
            let mut requests = pod_requests(&ps.spec).map_err(|e| {
                AdmiralError::validation_failed(
                    "Workload",
                    format!("{}: pod set {}: {}", key, ps.name, e),
                    "Use quantities such as \"500m\", \"2\" or \"1Gi\"",
                )
            })?;
            scale_requests(&mut requests, i64::from(ps.count));

            let flavors = admission
                .and_then(|a| a.pod_set_flavors.iter().find(|f| f.name == ps.name))
                .map(|f| f.flavors.clone())
                .unwrap_or_default();

            total_requests.push(PodSetRequests {
                name: ps.name.clone(),
                requests,
                flavors,
            });
        }

        Ok(Self {
            queue: ObjectKey::new(key.namespace.clone(), workload.spec.queue_name.clone()),
            key,
            uid: workload.uid().map(str::to_string),
            creation_timestamp: workload.creation_timestamp().unwrap_or_else(Utc::now),
            cluster_queue: admission.map(|a| a.cluster_queue.clone()),
            total_requests,
            obj: workload.clone(),
        })
    }

    /// Whether this workload already carries an admission
    pub fn is_admitted(&self) -> bool {
        self.cluster_queue.is_some()
    }

    /// Sum of requests across all pod sets
    pub fn total(&self) -> Requests {
        let mut total = Requests::new();
        for ps in &self.total_requests {
            add_requests(&mut total, &ps.requests);
        }
        total
    }
}

/// Requests of a single pod: the sum over containers, raised to the
/// largest init container, plus pod overhead.
pub fn pod_requests(spec: &PodSpec) -> std::result::Result<Requests, String> {
    let mut total = Requests::new();
    for container in &spec.containers {
        add_requests(&mut total, &container_requests(container)?);
    }

    for container in spec.init_containers.iter().flatten() {
        max_requests(&mut total, &container_requests(container)?);
    }

    if let Some(overhead) = &spec.overhead {
        add_requests(&mut total, &requests_from_resource_list(overhead)?);
    }

    Ok(total)
}

fn container_requests(container: &Container) -> std::result::Result<Requests, String> {
    match container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
        Some(requests) => requests_from_resource_list(requests),
        None => Ok(Requests::new()),
    }
}
