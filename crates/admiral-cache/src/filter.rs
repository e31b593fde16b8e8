use admiral_core::{PodSpec, Resource, ResourceFlavor};
use k8s_openapi::api::core::v1::{Taint, Toleration};
use tracing::debug;

/// Result of checking a flavor against a pod set
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Flavor name
    pub flavor: String,
    /// Whether the flavor passed the filter
    pub passed: bool,
    /// Reason for failure (if any)
    pub reason: Option<String>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn pass(flavor: String) -> Self {
        Self {
            flavor,
            passed: true,
            reason: None,
        }
    }

    /// Create a failing filter result
    pub fn fail(flavor: String, reason: String) -> Self {
        Self {
            flavor,
            passed: false,
            reason: Some(reason),
        }
    }
}

/// Flavor predicate trait
///
/// Predicates decide whether the pods of a pod set may run on the nodes a
/// flavor stands for. They never look at quota.
pub trait FlavorPredicate: Send + Sync {
    /// Filter a flavor for the given pod spec
    fn filter(&self, pod_spec: &PodSpec, flavor: &ResourceFlavor) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Flavor taints must be tolerated by the pod set
pub struct TaintToleration;

impl TaintToleration {
    fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
        if let Some(effect) = toleration.effect.as_deref() {
            if !effect.is_empty() && effect != taint.effect {
                return false;
            }
        }

        match toleration.operator.as_deref() {
            Some("Exists") => toleration
                .key
                .as_deref()
                .map_or(true, |k| k.is_empty() || k == taint.key),
            _ => {
                toleration.key.as_deref() == Some(taint.key.as_str())
                    && toleration.value.as_deref().unwrap_or_default()
                        == taint.value.as_deref().unwrap_or_default()
            }
        }
    }
}

impl FlavorPredicate for TaintToleration {
    fn filter(&self, pod_spec: &PodSpec, flavor: &ResourceFlavor) -> FilterResult {
        let flavor_name = flavor.name().to_string();
        let tolerations = pod_spec.tolerations.as_deref().unwrap_or_default();

        for taint in &flavor.taints {
            // Soft preferences never exclude a flavor
            if taint.effect == "PreferNoSchedule" {
                continue;
            }

            let tolerated = tolerations.iter().any(|t| Self::tolerates(t, taint));
            if !tolerated {
                debug!(
                    "Flavor {} taint {}={} not tolerated",
                    flavor_name,
                    taint.key,
                    taint.value.as_deref().unwrap_or_default()
                );
                return FilterResult::fail(
                    flavor_name,
                    format!(
                        "untolerated taint {}={}:{}",
                        taint.key,
                        taint.value.as_deref().unwrap_or_default(),
                        taint.effect
                    ),
                );
            }
        }

        FilterResult::pass(flavor_name)
    }

    fn name(&self) -> &str {
        "TaintToleration"
    }
}

/// A pod set's node selector must agree with the flavor's labels on every
/// key the flavor defines
pub struct NodeSelectorMatch;

impl FlavorPredicate for NodeSelectorMatch {
    fn filter(&self, pod_spec: &PodSpec, flavor: &ResourceFlavor) -> FilterResult {
        let flavor_name = flavor.name().to_string();

        let node_selector = match &pod_spec.node_selector {
            Some(selector) => selector,
            None => return FilterResult::pass(flavor_name), // No selector = pass
        };

        for (key, value) in node_selector {
            if let Some(label) = flavor.labels.get(key) {
                if label != value {
                    return FilterResult::fail(
                        flavor_name,
                        format!("node selector {}={} conflicts with flavor label {}={}", key, value, key, label),
                    );
                }
            }
        }

        FilterResult::pass(flavor_name)
    }

    fn name(&self) -> &str {
        "NodeSelectorMatch"
    }
}

/// Get default flavor predicates
pub fn default_filters() -> Vec<Box<dyn FlavorPredicate>> {
    vec![Box::new(TaintToleration), Box::new(NodeSelectorMatch)]
}
