//! Quota groups: the unit of serialization for quota arithmetic.
//!
//! A cohort is a group holding every ClusterQueue that names it. A
//! ClusterQueue without a cohort forms a group on its own and can neither
//! borrow nor lend.

use crate::assignment::Assignment;
use crate::cluster_queue::{usage_add, ClusterQueueState};
use admiral_core::{AdmiralError, ObjectKey};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Identity of a quota group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupId {
    Cohort(String),
    Standalone(String),
}

impl GroupId {
    pub fn for_queue(cluster_queue: &str, cohort: Option<&str>) -> Self {
        match cohort {
            Some(c) => GroupId::Cohort(c.to_string()),
            None => GroupId::Standalone(cluster_queue.to_string()),
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::Cohort(name) => write!(f, "cohort {}", name),
            GroupId::Standalone(name) => write!(f, "cluster queue {}", name),
        }
    }
}

/// Member queues of one group with their live usage
#[derive(Debug)]
pub struct QuotaGroup {
    pub id: GroupId,
    pub members: BTreeMap<String, ClusterQueueState>,
}

impl QuotaGroup {
    pub fn new(id: GroupId) -> Self {
        Self {
            id,
            members: BTreeMap::new(),
        }
    }

    fn is_cohort(&self) -> bool {
        matches!(self.id, GroupId::Cohort(_))
    }

    /// Usage summed over members
    pub fn cohort_used(&self, resource: &str, flavor: &str) -> i64 {
        self.members
            .values()
            .map(|m| m.used(resource, flavor))
            .fold(0, i64::saturating_add)
    }

    /// Min quota summed over members; the ceiling for the whole group
    pub fn cohort_min(&self, resource: &str, flavor: &str) -> i64 {
        self.members
            .values()
            .filter_map(|m| m.config.limits(resource, flavor))
            .map(|l| l.min)
            .fold(0, i64::saturating_add)
    }

    /// Check that `cluster_queue` can take `val` more of (resource, flavor).
    ///
    /// Returns whether the queue would be borrowing, or why it does not fit.
    pub fn check(
        &self,
        cluster_queue: &str,
        resource: &str,
        flavor: &str,
        val: i64,
    ) -> Result<bool, String> {
        let member = self
            .members
            .get(cluster_queue)
            .ok_or_else(|| format!("cluster queue {} is not in {}", cluster_queue, self.id))?;
        let limits = member.config.limits(resource, flavor).ok_or_else(|| {
            format!("resource {} has no flavor {} in cluster queue", resource, flavor)
        })?;

        let overflow = || format!("request for {} in flavor {} is too large", resource, flavor);
        let used = member.used(resource, flavor);
        let after = used.checked_add(val).ok_or_else(overflow)?;
        if let Some(max) = limits.max {
            if after > max {
                return Err(format!(
                    "borrowing limit for {} in flavor {} exceeded",
                    resource, flavor
                ));
            }
        }

        let (group_used, group_total) = if self.is_cohort() {
            (self.cohort_used(resource, flavor), self.cohort_min(resource, flavor))
        } else {
            (used, limits.min)
        };
        let group_after = group_used.checked_add(val).ok_or_else(overflow)?;
        if group_after > group_total {
            let lack = group_after - group_total;
            return Err(format!(
                "insufficient unused quota for {} in flavor {}, {} more needed",
                resource, flavor, lack
            ));
        }

        Ok(after > limits.min)
    }

    /// Charge an assignment to a member and index the workload
    pub fn charge(&mut self, cluster_queue: &str, key: ObjectKey, assignment: Assignment) -> bool {
        let Some(member) = self.members.get_mut(cluster_queue) else {
            return false;
        };
        for (resource, flavor, qty) in assignment.usage_entries() {
            usage_add(&mut member.usage, resource, flavor, qty);
        }
        member.workloads.insert(key, assignment);
        true
    }

    /// Undo a charge. Returns `None` when the workload holds nothing here.
    /// Counters never go below zero.
    pub fn uncharge(&mut self, cluster_queue: &str, key: &ObjectKey) -> Option<Assignment> {
        let member = self.members.get_mut(cluster_queue)?;
        let assignment = member.workloads.remove(key)?;

        for (resource, flavor, qty) in assignment.usage_entries() {
            let counter = member
                .usage
                .entry(resource.to_string())
                .or_default()
                .entry(flavor.to_string())
                .or_insert(0);
            if *counter < qty {
                let err = AdmiralError::inconsistency(
                    cluster_queue,
                    format!(
                        "releasing {} of {} in flavor {} for {} but only {} is in use",
                        qty, resource, flavor, key, *counter
                    ),
                );
                warn!("{}", err);
                *counter = 0;
            } else {
                *counter -= qty;
            }
        }

        Some(assignment)
    }
}
