use super::{Resource, API_VERSION};
use k8s_openapi::api::core::v1::Taint;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named variant of a resource, such as a pricing class or a GPU model
///
/// `labels` are the node labels a workload lands on when it is assigned this
/// flavor; `taints` must be tolerated by the workload's pods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFlavor {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

pub(crate) fn default_api_version() -> String {
    API_VERSION.to_string()
}

impl ResourceFlavor {
    /// Create a flavor with no labels or taints
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            labels: BTreeMap::new(),
            taints: Vec::new(),
        }
    }

    /// Add a node label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a taint
    pub fn with_taint(mut self, key: impl Into<String>, value: Option<&str>, effect: impl Into<String>) -> Self {
        self.taints.push(Taint {
            key: key.into(),
            value: value.map(str::to_string),
            effect: effect.into(),
            ..Default::default()
        });
        self
    }
}

impl Resource for ResourceFlavor {
    fn kind(&self) -> &'static str {
        "ResourceFlavor"
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
}
