use crate::resources::{ClusterQueue, LocalQueue, ResourceFlavor, Workload};
use crate::ObjectKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    /// Object created or updated; handlers treat both the same way
    Applied,
    Deleted,
}

/// Inbound change notification from the object store.
///
/// Events for the same object must be delivered in order; events for
/// different objects may interleave freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event")]
pub enum ClusterEvent {
    ResourceFlavor(ObjectEvent<ResourceFlavor>),
    ClusterQueue(ObjectEvent<ClusterQueue>),
    LocalQueue(ObjectEvent<LocalQueue>),
    Workload(ObjectEvent<Workload>),
    /// The workload ran to completion; its quota can be released
    WorkloadFinished { key: ObjectKey },
}

/// A create/update or delete of a single object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEvent<T> {
    pub event_type: WatchEventType,
    pub object: T,
}

impl<T> ObjectEvent<T> {
    pub fn applied(object: T) -> Self {
        Self {
            event_type: WatchEventType::Applied,
            object,
        }
    }

    pub fn deleted(object: T) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            object,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.event_type == WatchEventType::Deleted
    }
}

impl ClusterEvent {
    pub fn flavor_applied(flavor: ResourceFlavor) -> Self {
        Self::ResourceFlavor(ObjectEvent::applied(flavor))
    }

    pub fn flavor_deleted(flavor: ResourceFlavor) -> Self {
        Self::ResourceFlavor(ObjectEvent::deleted(flavor))
    }

    pub fn cluster_queue_applied(cq: ClusterQueue) -> Self {
        Self::ClusterQueue(ObjectEvent::applied(cq))
    }

    pub fn cluster_queue_deleted(cq: ClusterQueue) -> Self {
        Self::ClusterQueue(ObjectEvent::deleted(cq))
    }

    pub fn local_queue_applied(lq: LocalQueue) -> Self {
        Self::LocalQueue(ObjectEvent::applied(lq))
    }

    pub fn local_queue_deleted(lq: LocalQueue) -> Self {
        Self::LocalQueue(ObjectEvent::deleted(lq))
    }

    pub fn workload_applied(wl: Workload) -> Self {
        Self::Workload(ObjectEvent::applied(wl))
    }

    pub fn workload_deleted(wl: Workload) -> Self {
        Self::Workload(ObjectEvent::deleted(wl))
    }

    pub fn workload_finished(key: ObjectKey) -> Self {
        Self::WorkloadFinished { key }
    }
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::resources::Resource;

        fn describe<T: Resource>(f: &mut fmt::Formatter<'_>, e: &ObjectEvent<T>) -> fmt::Result {
            let verb = if e.is_delete() { "deleted" } else { "applied" };
            match e.object.key() {
                Ok(key) => write!(f, "{} {} {}", e.object.kind(), key, verb),
                Err(_) => write!(f, "{} <unnamed> {}", e.object.kind(), verb),
            }
        }

        match self {
            ClusterEvent::ResourceFlavor(e) => describe(f, e),
            ClusterEvent::ClusterQueue(e) => describe(f, e),
            ClusterEvent::LocalQueue(e) => describe(f, e),
            ClusterEvent::Workload(e) => describe(f, e),
            ClusterEvent::WorkloadFinished { key } => write!(f, "Workload {} finished", key),
        }
    }
}
