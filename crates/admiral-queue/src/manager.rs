use admiral_core::{
    AdmiralError, ClusterQueue, LocalQueue, ObjectKey, QueueingStrategy, Resource, Result,
    WorkloadInfo,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Position of a pending workload inside its cluster queue
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    timestamp: DateTime<Utc>,
    key: ObjectKey,
}

impl OrderKey {
    fn of(info: &WorkloadInfo) -> Self {
        Self {
            timestamp: info.creation_timestamp,
            key: info.key.clone(),
        }
    }
}

/// A pending workload as seen by the scheduler
#[derive(Debug, Clone)]
pub struct QueuedWorkload {
    pub cluster_queue: String,
    pub strategy: QueueingStrategy,
    pub info: Arc<WorkloadInfo>,
    /// Changes whenever the pending entry is replaced
    pub seq: u64,
}

impl QueuedWorkload {
    pub fn key(&self) -> &ObjectKey {
        &self.info.key
    }
}

struct LocalQueueEntry {
    cluster_queue: String,
    workloads: BTreeSet<ObjectKey>,
}

struct ClusterQueueEntry {
    strategy: QueueingStrategy,
    pending: BTreeSet<OrderKey>,
}

struct PendingEntry {
    info: Arc<WorkloadInfo>,
    seq: u64,
    /// Last reason reported for not admitting the workload
    message: Option<String>,
}

#[derive(Default)]
struct QueueState {
    local_queues: HashMap<ObjectKey, LocalQueueEntry>,
    cluster_queues: HashMap<String, ClusterQueueEntry>,
    /// Every pending workload, whether queued or parked behind a missing
    /// cluster queue
    workloads: HashMap<ObjectKey, PendingEntry>,
    next_seq: u64,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn target_of(&self, info: &WorkloadInfo) -> Option<&str> {
        self.local_queues
            .get(&info.queue)
            .map(|lq| lq.cluster_queue.as_str())
    }

    /// Take a workload out of every structure. Returns the removed entry.
    fn remove(&mut self, key: &ObjectKey) -> Option<PendingEntry> {
        let entry = self.workloads.remove(key)?;
        if let Some(lq) = self.local_queues.get_mut(&entry.info.queue) {
            lq.workloads.remove(key);
            let target = lq.cluster_queue.clone();
            if let Some(cq) = self.cluster_queues.get_mut(&target) {
                cq.pending.remove(&OrderKey::of(&entry.info));
            }
        }
        Some(entry)
    }

    fn insert(&mut self, info: Arc<WorkloadInfo>, message: Option<String>) -> Result<u64> {
        let target = self
            .target_of(&info)
            .ok_or_else(|| AdmiralError::unknown_queue(info.queue.to_string()))?
            .to_string();
        if !self.cluster_queues.contains_key(&target) {
            return Err(AdmiralError::unknown_queue(target));
        }

        self.remove(&info.key);
        let seq = self.next_seq();
        if let Some(lq) = self.local_queues.get_mut(&info.queue) {
            lq.workloads.insert(info.key.clone());
        }
        if let Some(cq) = self.cluster_queues.get_mut(&target) {
            cq.pending.insert(OrderKey::of(&info));
        }
        self.workloads.insert(
            info.key.clone(),
            PendingEntry { info, seq, message },
        );
        Ok(seq)
    }

    fn queued(&self, cluster_queue: &str, strategy: QueueingStrategy, key: &OrderKey) -> Option<QueuedWorkload> {
        let entry = self.workloads.get(&key.key)?;
        Some(QueuedWorkload {
            cluster_queue: cluster_queue.to_string(),
            strategy,
            info: entry.info.clone(),
            seq: entry.seq,
        })
    }
}

/// Pending workloads ordered per cluster queue.
///
/// Every pending workload lives in exactly one cluster queue, ordered by
/// creation timestamp and then by key. The manager does no quota logic.
pub struct Manager {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Register a local queue, or retarget it if it exists
    pub fn add_local_queue(&self, lq: &LocalQueue) -> Result<()> {
        lq.validate()?;
        let key = lq.key()?;
        let mut state = self.state.lock();

        if state.local_queues.contains_key(&key) {
            drop(state);
            return self.update_local_queue(lq);
        }

        state.local_queues.insert(
            key.clone(),
            LocalQueueEntry {
                cluster_queue: lq.spec.cluster_queue.clone(),
                workloads: BTreeSet::new(),
            },
        );
        info!(
            "Added local queue {} for cluster queue {}",
            key, lq.spec.cluster_queue
        );
        Ok(())
    }

    /// Point a local queue at another cluster queue. Its pending workloads
    /// move along.
    pub fn update_local_queue(&self, lq: &LocalQueue) -> Result<()> {
        lq.validate()?;
        let key = lq.key()?;
        let mut state = self.state.lock();
        let state = &mut *state;

        let entry = state
            .local_queues
            .get_mut(&key)
            .ok_or_else(|| AdmiralError::resource_not_found(format!("LocalQueue/{}", key)))?;
        let old = std::mem::replace(&mut entry.cluster_queue, lq.spec.cluster_queue.clone());
        if old == entry.cluster_queue {
            return Ok(());
        }

        let moved: Vec<OrderKey> = entry
            .workloads
            .iter()
            .filter_map(|k| state.workloads.get(k))
            .map(|e| OrderKey::of(&e.info))
            .collect();
        if let Some(cq) = state.cluster_queues.get_mut(&old) {
            for k in &moved {
                cq.pending.remove(k);
            }
        }
        if let Some(cq) = state.cluster_queues.get_mut(&lq.spec.cluster_queue) {
            cq.pending.extend(moved.iter().cloned());
        }
        info!(
            "Local queue {} moved from cluster queue {} to {} with {} pending workloads",
            key,
            old,
            lq.spec.cluster_queue,
            moved.len()
        );
        self.notify.notify_one();
        Ok(())
    }

    /// Remove a local queue and every workload pending in it. The removed
    /// workloads are returned.
    pub fn delete_local_queue(&self, key: &ObjectKey) -> Vec<Arc<WorkloadInfo>> {
        let mut state = self.state.lock();
        let Some(entry) = state.local_queues.get(key) else {
            return Vec::new();
        };
        let keys: Vec<ObjectKey> = entry.workloads.iter().cloned().collect();
        let removed: Vec<Arc<WorkloadInfo>> = keys
            .iter()
            .filter_map(|k| state.remove(k))
            .map(|e| e.info)
            .collect();
        state.local_queues.remove(key);
        info!(
            "Deleted local queue {} ({} pending workloads dropped)",
            key,
            removed.len()
        );
        removed
    }

    pub fn has_local_queue(&self, key: &ObjectKey) -> bool {
        self.state.lock().local_queues.contains_key(key)
    }

    /// Register a cluster queue, or update its strategy if it exists.
    /// Workloads parked in local queues pointing at it become pending again.
    pub fn add_cluster_queue(&self, cq: &ClusterQueue) {
        let name = cq.name().to_string();
        let strategy = cq.spec.queueing_strategy;
        let mut state = self.state.lock();
        let state = &mut *state;

        if let Some(entry) = state.cluster_queues.get_mut(&name) {
            if entry.strategy != strategy {
                info!(
                    "Cluster queue {} queueing strategy changed to {}",
                    name, strategy
                );
                entry.strategy = strategy;
            }
            return;
        }

        let pending: BTreeSet<OrderKey> = state
            .local_queues
            .values()
            .filter(|lq| lq.cluster_queue == name)
            .flat_map(|lq| lq.workloads.iter())
            .filter_map(|k| state.workloads.get(k))
            .map(|e| OrderKey::of(&e.info))
            .collect();
        info!(
            "Added cluster queue {} ({}, {} pending workloads)",
            name,
            strategy,
            pending.len()
        );
        state
            .cluster_queues
            .insert(name, ClusterQueueEntry { strategy, pending });
        self.notify.notify_one();
    }

    pub fn update_cluster_queue(&self, cq: &ClusterQueue) {
        self.add_cluster_queue(cq)
    }

    /// Stop queueing for a cluster queue. Its workloads stay parked in their
    /// local queues until the cluster queue comes back.
    pub fn delete_cluster_queue(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        match state.cluster_queues.remove(name) {
            Some(entry) => {
                info!(
                    "Deleted cluster queue {} ({} workloads parked)",
                    name,
                    entry.pending.len()
                );
                true
            }
            None => false,
        }
    }

    /// Queue a pending workload. A workload already present is replaced.
    pub fn add_workload(&self, info: WorkloadInfo) -> Result<()> {
        let key = info.key.clone();
        let mut state = self.state.lock();
        let message = state.workloads.get(&key).and_then(|e| e.message.clone());
        state.insert(Arc::new(info), message)?;
        debug!("Queued workload {}", key);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Replace a pending workload, moving it if its local queue changed
    pub fn update_workload(&self, info: WorkloadInfo) -> Result<()> {
        self.add_workload(info)
    }

    /// Put back a workload whose admission did not go through. A newer
    /// version that arrived in the meantime wins.
    pub fn requeue_workload(&self, info: Arc<WorkloadInfo>) -> Result<bool> {
        let key = info.key.clone();
        let mut state = self.state.lock();
        if state.workloads.contains_key(&key) {
            return Ok(false);
        }
        state.insert(info, None)?;
        debug!("Requeued workload {}", key);
        drop(state);
        self.notify.notify_one();
        Ok(true)
    }

    pub fn remove_workload(&self, key: &ObjectKey) -> bool {
        let removed = self.state.lock().remove(key).is_some();
        if removed {
            debug!("Removed workload {} from its queue", key);
        }
        removed
    }

    /// Remove a workload only if it is still the entry the caller saw
    pub fn remove_if_current(&self, key: &ObjectKey, seq: u64) -> Option<Arc<WorkloadInfo>> {
        let mut state = self.state.lock();
        if state.workloads.get(key)?.seq != seq {
            return None;
        }
        state.remove(key).map(|e| e.info)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state.lock().workloads.contains_key(key)
    }

    /// Current head of every non-empty cluster queue, by cluster queue name
    pub fn heads(&self) -> Vec<QueuedWorkload> {
        let state = self.state.lock();
        let mut names: Vec<&String> = state.cluster_queues.keys().collect();
        names.sort();

        names
            .into_iter()
            .filter_map(|name| {
                let cq = &state.cluster_queues[name];
                let first = cq.pending.first()?;
                state.queued(name, cq.strategy, first)
            })
            .collect()
    }

    /// The workload queued right behind `after` in the same cluster queue
    pub fn next_after(&self, after: &QueuedWorkload) -> Option<QueuedWorkload> {
        let state = self.state.lock();
        let cq = state.cluster_queues.get(&after.cluster_queue)?;
        let from = OrderKey::of(&after.info);
        let next = cq
            .pending
            .range((std::ops::Bound::Excluded(&from), std::ops::Bound::Unbounded))
            .next()?;
        state.queued(&after.cluster_queue, cq.strategy, next)
    }

    /// Keys of the workloads pending in a cluster queue, in order
    pub fn pending_workloads(&self, cluster_queue: &str) -> Vec<ObjectKey> {
        self.state
            .lock()
            .cluster_queues
            .get(cluster_queue)
            .map(|cq| cq.pending.iter().map(|k| k.key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, cluster_queue: &str) -> usize {
        self.state
            .lock()
            .cluster_queues
            .get(cluster_queue)
            .map_or(0, |cq| cq.pending.len())
    }

    /// Pending count of every registered cluster queue
    pub fn pending_counts(&self) -> BTreeMap<String, usize> {
        self.state
            .lock()
            .cluster_queues
            .iter()
            .map(|(name, cq)| (name.clone(), cq.pending.len()))
            .collect()
    }

    /// Pending workloads including parked ones
    pub fn total_pending(&self) -> usize {
        self.state.lock().workloads.len()
    }

    fn has_heads(&self) -> bool {
        self.state
            .lock()
            .cluster_queues
            .values()
            .any(|cq| !cq.pending.is_empty())
    }

    /// Record why a workload was not admitted. Returns whether the message
    /// differs from the last one recorded.
    pub fn set_pending_message(&self, key: &ObjectKey, message: &str) -> bool {
        let mut state = self.state.lock();
        match state.workloads.get_mut(key) {
            Some(entry) if entry.message.as_deref() != Some(message) => {
                entry.message = Some(message.to_string());
                true
            }
            _ => false,
        }
    }

    /// Wait until at least one cluster queue has a pending head
    pub async fn wait_for_heads(&self) {
        loop {
            let notified = self.notify.notified();
            if self.has_heads() {
                return;
            }
            notified.await;
        }
    }

    /// Wait for the next [`Manager::broadcast`] or queue change
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wake the scheduler because queue or quota state changed
    pub fn broadcast(&self) {
        self.notify.notify_one();
    }
}
