use serde::{Deserialize, Serialize};
use std::fmt;

/// ObjectKey uniquely identifies a resource instance of a given kind
///
/// Ordering is lexicographic on (namespace, name) and is used as the
/// deterministic tie-breaker wherever two objects otherwise compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace (empty for cluster-scoped resources)
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ObjectKey {
    /// Create a namespaced key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a cluster-scoped key
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Check if this key refers to a namespaced resource
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// Parse `namespace/name` or a bare cluster-scoped `name`
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::cluster_scoped(s),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_namespaced() {
            write!(f, "{}/{}", self.namespace, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}
