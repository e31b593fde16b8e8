//! Admiral Core - API objects and shared types for the Admiral admission controller
//!
//! This crate provides:
//! - ResourceFlavor, ClusterQueue, LocalQueue and Workload objects
//! - Quantity parsing and request normalization
//! - Inbound cluster events
//! - Error types with miette diagnostics

pub mod error;
pub mod events;
pub mod info;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{AdmiralError, Result};
pub use events::{ClusterEvent, ObjectEvent, WatchEventType};
pub use info::{PodSetRequests, WorkloadInfo};
pub use resources::{
    is_valid_name, Admission, ClusterQueue, ClusterQueueSpec, FlavorQuota, LocalQueue,
    PodSet, PodSetFlavors, QueueingStrategy, Requests, Resource, ResourceFlavor, ResourceSpec,
    Workload, CONDITION_ADMITTED, CONDITION_FINISHED,
};
pub use types::ObjectKey;

use serde::Deserialize as _;

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{PodSpec, Taint, Toleration};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};

/// Serialize a resource to JSON
pub fn to_json<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string(resource).map_err(|e| {
        AdmiralError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a resource to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string_pretty(resource).map_err(|e| {
        AdmiralError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        AdmiralError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        AdmiralError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize every document of a multi-document YAML stream
pub fn from_yaml_documents<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for document in serde_yaml::Deserializer::from_str(data) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| {
            AdmiralError::serialization_error(
                format!("Failed to parse YAML document: {}", e),
                Some(Box::new(e)),
            )
        })?;
        if value.is_null() {
            continue;
        }
        let item = serde_yaml::from_value(value).map_err(|e| {
            AdmiralError::serialization_error(
                format!("Failed to deserialize from YAML: {}", e),
                Some(Box::new(e)),
            )
        })?;
        out.push(item);
    }
    Ok(out)
}
