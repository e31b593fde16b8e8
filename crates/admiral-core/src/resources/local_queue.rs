use super::flavor::default_api_version;
use super::{validate_base, Resource};
use crate::{AdmiralError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalQueueSpec {
    /// ClusterQueue that receives this queue's workloads
    pub cluster_queue: String,
}

/// Namespaced submission point routing workloads to one ClusterQueue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalQueue {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: LocalQueueSpec,
}

impl LocalQueue {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        cluster_queue: impl Into<String>,
    ) -> Self {
        Self {
            api_version: default_api_version(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            spec: LocalQueueSpec {
                cluster_queue: cluster_queue.into(),
            },
        }
    }
}

impl Resource for LocalQueue {
    fn kind(&self) -> &'static str {
        "LocalQueue"
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> Result<()> {
        validate_base(self.kind(), &self.metadata, true)?;
        if self.spec.cluster_queue.is_empty() {
            return Err(AdmiralError::validation_failed(
                self.kind(),
                "Missing required field: spec.clusterQueue",
                "Point the LocalQueue at an existing ClusterQueue",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_queue_key() {
        let lq = LocalQueue::new("team-a", "main", "cq-a");
        assert_eq!(lq.key().unwrap().to_string(), "team-a/main");
        assert!(lq.validate().is_ok());
    }

    #[test]
    fn test_local_queue_requires_cluster_queue() {
        let lq = LocalQueue::new("team-a", "main", "");
        assert!(lq.validate().is_err());
    }
}
