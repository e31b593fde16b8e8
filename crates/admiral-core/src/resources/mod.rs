pub mod cluster_queue;
pub mod flavor;
pub mod local_queue;
pub mod quantities;
pub mod workload;

pub use cluster_queue::{ClusterQueue, ClusterQueueSpec, FlavorQuota, QueueingStrategy, ResourceSpec};
pub use flavor::ResourceFlavor;
pub use local_queue::{LocalQueue, LocalQueueSpec};
pub use quantities::Requests;
pub use workload::{
    Admission, PodSet, PodSetFlavors, Workload, WorkloadSpec, WorkloadStatus,
    CONDITION_ADMITTED, CONDITION_FINISHED,
};

use crate::{AdmiralError, ObjectKey, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// API version shared by every Admiral object
pub const API_VERSION: &str = "admiral.dev/v1alpha1";

/// Base validation for all resources
pub fn validate_base(kind: &str, metadata: &ObjectMeta, namespaced: bool) -> Result<()> {
    let name = metadata.name.as_deref().ok_or_else(|| {
        AdmiralError::validation_failed(kind, "Missing required field: metadata.name", "Set metadata.name")
    })?;

    if !is_valid_name(name) {
        return Err(AdmiralError::validation_failed(
            kind,
            format!("Invalid resource name: {}", name),
            "Names must be lowercase alphanumeric, '-', or '.'",
        ));
    }

    match (&metadata.namespace, namespaced) {
        (None, true) => Err(AdmiralError::validation_failed(
            kind,
            "Missing required field: metadata.namespace",
            format!("{} is namespaced; set metadata.namespace", kind),
        )),
        (Some(ns), true) if !is_valid_name(ns) => Err(AdmiralError::validation_failed(
            kind,
            format!("Invalid namespace: {}", ns),
            "Namespaces must be lowercase alphanumeric, '-', or '.'",
        )),
        _ => Ok(()),
    }
}

/// Trait for Admiral API objects
pub trait Resource: Serialize + for<'de> Deserialize<'de> + Send + Sync {
    /// Get the kind of this resource
    fn kind(&self) -> &'static str;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Whether objects of this kind live in a namespace
    fn is_namespaced(&self) -> bool {
        true
    }

    /// Get the name, or an empty string when unset
    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Get the ObjectKey
    fn key(&self) -> Result<ObjectKey> {
        let metadata = self.metadata();
        let name = metadata.name.as_ref().ok_or_else(|| {
            AdmiralError::validation_failed(
                self.kind(),
                "Missing required field: metadata.name",
                "Set metadata.name",
            )
        })?;

        if self.is_namespaced() {
            let namespace = metadata.namespace.clone().unwrap_or_default();
            Ok(ObjectKey::new(namespace, name))
        } else {
            Ok(ObjectKey::cluster_scoped(name))
        }
    }

    /// Get the UID
    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    /// Get the creation timestamp
    fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata().creation_timestamp.as_ref().map(|t| t.0)
    }

    /// Validate the resource
    fn validate(&self) -> Result<()> {
        validate_base(self.kind(), self.metadata(), self.is_namespaced())
    }
}

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    // Must contain only lowercase alphanumeric, '-', or '.'
    // Must start and end with alphanumeric
    let chars: Vec<char> = name.chars().collect();

    if !chars[0].is_ascii_lowercase() && !chars[0].is_ascii_digit() {
        return false;
    }

    if !chars[chars.len() - 1].is_ascii_lowercase() && !chars[chars.len() - 1].is_ascii_digit() {
        return false;
    }

    chars
        .iter()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("spot"));
        assert!(is_valid_name("team-a"));
        assert!(is_valid_name("gpu.a100"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("TeamA")); // uppercase
        assert!(!is_valid_name("-queue")); // starts with dash
        assert!(!is_valid_name("queue-")); // ends with dash
        assert!(!is_valid_name("my_queue")); // underscore
    }

    #[test]
    fn test_validate_base_namespaced() {
        let mut meta = ObjectMeta {
            name: Some("wl".to_string()),
            ..Default::default()
        };
        assert!(validate_base("Workload", &meta, true).is_err());
        assert!(validate_base("ClusterQueue", &meta, false).is_ok());

        meta.namespace = Some("team-a".to_string());
        assert!(validate_base("Workload", &meta, true).is_ok());
    }
}
