use admiral_core::{Admission, ObjectKey, Workload};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Failure reported by the object store when writing a workload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// Worth retrying as is
    #[error("transient failure: {0}")]
    Transient(String),
    /// The workload no longer exists
    #[error("workload not found: {0}")]
    NotFound(String),
    /// The write was refused, e.g. on a conflicting update
    #[error("rejected: {0}")]
    Rejected(String),
}

/// A condition to set on a workload, with append-or-replace-by-type semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub type_: String,
    pub status: String,
    pub reason: String,
    pub message: String,
}

impl ConditionUpdate {
    pub fn new(
        type_: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Outbound writes of admission decisions
///
/// Implementations persist the admission on the workload object. The
/// scheduler retries `Transient` failures and rolls the quota back on the
/// others.
#[async_trait]
pub trait AdmissionApplier: Send + Sync {
    /// Record the admission on the workload
    async fn apply_admission(&self, key: &ObjectKey, admission: &Admission) -> Result<(), ApplyError>;

    /// Set a status condition on the workload
    async fn update_condition(&self, key: &ObjectKey, condition: ConditionUpdate) -> Result<(), ApplyError>;
}

/// In-memory workload store for tests and local runs
///
/// Failures can be queued with [`InMemoryApplier::inject_failure`]; each
/// `apply_admission` call consumes one before touching the store.
pub struct InMemoryApplier {
    workloads: Arc<RwLock<HashMap<ObjectKey, Workload>>>,
    failures: Arc<Mutex<VecDeque<ApplyError>>>,
}

impl Default for InMemoryApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryApplier {
    pub fn new() -> Self {
        Self {
            workloads: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Store or replace a workload
    pub async fn insert(&self, workload: Workload) {
        if let Some(name) = workload.metadata.name.clone() {
            let namespace = workload.metadata.namespace.clone().unwrap_or_default();
            self.workloads
                .write()
                .await
                .insert(ObjectKey::new(namespace, name), workload);
        }
    }

    pub async fn remove(&self, key: &ObjectKey) -> Option<Workload> {
        self.workloads.write().await.remove(key)
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<Workload> {
        self.workloads.read().await.get(key).cloned()
    }

    /// Make the next `apply_admission` call fail
    pub async fn inject_failure(&self, error: ApplyError) {
        self.failures.lock().await.push_back(error);
    }

    pub async fn admitted_count(&self) -> usize {
        self.workloads
            .read()
            .await
            .values()
            .filter(|w| w.spec.admission.is_some())
            .count()
    }

    /// Workloads without an admission
    pub async fn pending_count(&self) -> usize {
        self.workloads
            .read()
            .await
            .values()
            .filter(|w| w.spec.admission.is_none() && !w.is_finished())
            .count()
    }
}

#[async_trait]
impl AdmissionApplier for InMemoryApplier {
    async fn apply_admission(&self, key: &ObjectKey, admission: &Admission) -> Result<(), ApplyError> {
        if let Some(error) = self.failures.lock().await.pop_front() {
            debug!("InMemory: injected failure for {}: {}", key, error);
            return Err(error);
        }

        let mut workloads = self.workloads.write().await;
        let workload = workloads
            .get_mut(key)
            .ok_or_else(|| ApplyError::NotFound(key.to_string()))?;
        if let Some(existing) = &workload.spec.admission {
            return Err(ApplyError::Rejected(format!(
                "workload {} is already admitted to {}",
                key, existing.cluster_queue
            )));
        }

        workload.spec.admission = Some(admission.clone());
        debug!("InMemory: admitted {} to {}", key, admission.cluster_queue);
        Ok(())
    }

    async fn update_condition(&self, key: &ObjectKey, condition: ConditionUpdate) -> Result<(), ApplyError> {
        let mut workloads = self.workloads.write().await;
        let workload = workloads
            .get_mut(key)
            .ok_or_else(|| ApplyError::NotFound(key.to_string()))?;
        workload.set_condition(
            &condition.type_,
            &condition.status,
            &condition.reason,
            &condition.message,
            Utc::now(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admiral_core::{PodSetFlavors, CONDITION_ADMITTED};
    use std::collections::BTreeMap;

    fn make_admission(cq: &str) -> Admission {
        Admission {
            cluster_queue: cq.to_string(),
            pod_set_flavors: vec![PodSetFlavors {
                name: "main".to_string(),
                flavors: BTreeMap::from([("cpu".to_string(), "default".to_string())]),
            }],
        }
    }

    #[tokio::test]
    async fn test_apply_admission() {
        let applier = InMemoryApplier::new();
        applier.insert(Workload::new("ns", "wl", "main")).await;
        let key = ObjectKey::new("ns", "wl");
        assert_eq!(applier.pending_count().await, 1);

        applier.apply_admission(&key, &make_admission("cq")).await.unwrap();
        assert_eq!(applier.admitted_count().await, 1);
        assert_eq!(applier.pending_count().await, 0);

        let err = applier.apply_admission(&key, &make_admission("cq")).await.unwrap_err();
        assert!(matches!(err, ApplyError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_apply_admission_missing_workload() {
        let applier = InMemoryApplier::new();
        let err = applier
            .apply_admission(&ObjectKey::new("ns", "gone"), &make_admission("cq"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let applier = InMemoryApplier::new();
        applier.insert(Workload::new("ns", "wl", "main")).await;
        applier.inject_failure(ApplyError::Transient("timeout".to_string())).await;
        let key = ObjectKey::new("ns", "wl");

        assert!(matches!(
            applier.apply_admission(&key, &make_admission("cq")).await,
            Err(ApplyError::Transient(_))
        ));
        assert!(applier.apply_admission(&key, &make_admission("cq")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_condition_replaces_by_type() {
        let applier = InMemoryApplier::new();
        applier.insert(Workload::new("ns", "wl", "main")).await;
        let key = ObjectKey::new("ns", "wl");

        applier
            .update_condition(&key, ConditionUpdate::new(CONDITION_ADMITTED, "False", "Pending", "no quota"))
            .await
            .unwrap();
        applier
            .update_condition(&key, ConditionUpdate::new(CONDITION_ADMITTED, "True", "Admitted", "ok"))
            .await
            .unwrap();

        let wl = applier.get(&key).await.unwrap();
        assert_eq!(wl.status.conditions.len(), 1);
        assert!(wl.has_condition(CONDITION_ADMITTED));
        assert_eq!(wl.condition(CONDITION_ADMITTED).unwrap().reason, "Admitted");
    }
}
