use crate::{Result, SchedulerError};
use admiral_cache::Cache;
use admiral_core::{
    AdmiralError, ClusterEvent, ClusterQueue, LocalQueue, ObjectEvent, ObjectKey, Resource,
    ResourceFlavor, Workload, WorkloadInfo,
};
use admiral_queue::Manager;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the inbound event channel
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Events buffered before senders wait
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// Create the inbound event channel
pub fn event_channel(
    config: &EventBusConfig,
) -> (mpsc::Sender<ClusterEvent>, mpsc::Receiver<ClusterEvent>) {
    mpsc::channel(config.capacity)
}

/// Send an event to the handler
pub async fn send_event(tx: &mpsc::Sender<ClusterEvent>, event: ClusterEvent) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|_| SchedulerError::channel_closed("cluster events"))
}

/// Applies inbound cluster events to the cache and the queue manager.
///
/// Events for one object must arrive in order. Pending workloads whose
/// local queue or cluster queue does not exist yet are held back and
/// queued once it shows up.
pub struct EventHandler {
    cache: Arc<Cache>,
    queues: Arc<Manager>,
    orphans: HashMap<ObjectKey, Workload>,
}

impl EventHandler {
    pub fn new(cache: Arc<Cache>, queues: Arc<Manager>) -> Self {
        Self {
            cache,
            queues,
            orphans: HashMap::new(),
        }
    }

    /// Workloads waiting for their queue to exist
    pub fn unqueued_count(&self) -> usize {
        self.orphans.len()
    }

    /// Apply one event and wake the scheduler
    pub fn handle(&mut self, event: ClusterEvent) -> Result<()> {
        let result = match event {
            ClusterEvent::ResourceFlavor(ev) => self.on_flavor(ev),
            ClusterEvent::ClusterQueue(ev) => self.on_cluster_queue(ev),
            ClusterEvent::LocalQueue(ev) => self.on_local_queue(ev),
            ClusterEvent::Workload(ev) => self.on_workload(ev),
            ClusterEvent::WorkloadFinished { key } => {
                self.finish(&key);
                Ok(())
            }
        };
        self.queues.broadcast();
        result
    }

    /// Consume events until the channel closes or the token is cancelled
    pub async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ClusterEvent>,
        token: CancellationToken,
    ) -> Result<()> {
        info!("Starting event handler");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Event handler shutting down");
                    return Ok(());
                }
                event = rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle(event) {
                            warn!("Failed to apply event: {}", e);
                        }
                    }
                    None => {
                        info!("Event channel closed, event handler stopping");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn on_flavor(&mut self, ev: ObjectEvent<ResourceFlavor>) -> Result<()> {
        if ev.is_delete() {
            self.cache.delete_flavor(ev.object.name());
            return Ok(());
        }
        self.cache.add_or_update_flavor(ev.object)?;
        Ok(())
    }

    fn on_cluster_queue(&mut self, ev: ObjectEvent<ClusterQueue>) -> Result<()> {
        let deleted = ev.is_delete();
        let cq = ev.object;
        if deleted {
            self.cache.delete_cluster_queue(cq.name());
            self.queues.delete_cluster_queue(cq.name());
            return Ok(());
        }

        self.cache.apply_cluster_queue(&cq)?;
        self.queues.add_cluster_queue(&cq);
        self.retry_orphans();
        Ok(())
    }

    fn on_local_queue(&mut self, ev: ObjectEvent<LocalQueue>) -> Result<()> {
        let deleted = ev.is_delete();
        let lq = ev.object;
        if deleted {
            let key = lq.key()?;
            for info in self.queues.delete_local_queue(&key) {
                self.orphans.insert(info.key.clone(), info.obj.clone());
            }
            return Ok(());
        }

        self.queues.add_local_queue(&lq)?;
        self.retry_orphans();
        Ok(())
    }

    fn on_workload(&mut self, ev: ObjectEvent<Workload>) -> Result<()> {
        if ev.is_delete() {
            let key = ev.object.key()?;
            self.queues.remove_workload(&key);
            self.orphans.remove(&key);
            if self.cache.delete_workload(&key).is_some() {
                info!("Workload {} deleted, quota released", key);
            }
            return Ok(());
        }
        self.apply_workload(ev.object)
    }

    fn apply_workload(&mut self, mut workload: Workload) -> Result<()> {
        let key = workload.key()?;
        // Queue order must not shift between updates
        if workload.metadata.creation_timestamp.is_none() {
            workload = workload.with_creation_timestamp(Utc::now());
        }
        if workload.is_finished() {
            self.finish(&key);
            return Ok(());
        }

        let info = WorkloadInfo::new(&workload)?;
        if info.is_admitted() {
            self.queues.remove_workload(&key);
            self.orphans.remove(&key);
            return match self.cache.add_or_update_workload(&info) {
                Ok(_) => Ok(()),
                Err(AdmiralError::UnknownQueue { .. }) => {
                    debug!("Admitted workload {} waits for its cluster queue", key);
                    self.orphans.insert(key, workload);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            };
        }

        // Admission cleared, e.g. on eviction
        if let Some(cq) = self.cache.admitted_in(&key) {
            self.cache.release(&key);
            info!(
                "Workload {} lost its admission to cluster queue {}, queueing again",
                key, cq
            );
        }

        match self.queues.add_workload(info) {
            Ok(()) => {
                self.orphans.remove(&key);
                Ok(())
            }
            Err(AdmiralError::UnknownQueue { .. }) => {
                let queue = ObjectKey::new(key.namespace.clone(), workload.spec.queue_name.clone());
                if self.queues.has_local_queue(&queue) {
                    debug!("Workload {} waits for the cluster queue of {}", key, queue);
                } else {
                    debug!("Workload {} waits for local queue {}", key, queue);
                }
                self.orphans.insert(key, workload);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&mut self, key: &ObjectKey) {
        self.queues.remove_workload(key);
        self.orphans.remove(key);
        if let Some(assignment) = self.cache.release(key) {
            info!(
                "Workload {} finished, released quota in cluster queue {}",
                key, assignment.cluster_queue
            );
        }
    }

    fn retry_orphans(&mut self) {
        if self.orphans.is_empty() {
            return;
        }
        let orphans = std::mem::take(&mut self.orphans);
        for (key, workload) in orphans {
            if let Err(e) = self.apply_workload(workload) {
                warn!("Failed to queue workload {}: {}", key, e);
            }
        }
        debug!("{} workloads still wait for their queue", self.orphans.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admiral_core::{
        Admission, FlavorQuota, PodSetFlavors, PodSpec, QueueingStrategy, ResourceSpec,
        CONDITION_FINISHED,
    };
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn create_test_handler() -> (EventHandler, Arc<Cache>, Arc<Manager>) {
        let cache = Arc::new(Cache::new());
        let queues = Arc::new(Manager::new());
        let handler = EventHandler::new(cache.clone(), queues.clone());
        (handler, cache, queues)
    }

    fn make_cq() -> ClusterQueue {
        ClusterQueue::new("cq")
            .with_strategy(QueueingStrategy::BestEffortFIFO)
            .with_resource(ResourceSpec::new("cpu", vec![FlavorQuota::new("default", "4")]))
    }

    fn make_workload(name: &str, cpu: &str) -> Workload {
        let spec = PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([("cpu".to_string(), Quantity(cpu.to_string()))])),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        Workload::new("ns", name, "main")
            .with_pod_set("main", 1, spec)
            .with_creation_timestamp(Utc.timestamp_opt(1, 0).unwrap())
    }

    fn admitted(wl: Workload) -> Workload {
        wl.with_admission(Admission {
            cluster_queue: "cq".to_string(),
            pod_set_flavors: vec![PodSetFlavors {
                name: "main".to_string(),
                flavors: BTreeMap::from([("cpu".to_string(), "default".to_string())]),
            }],
        })
    }

    fn setup(handler: &mut EventHandler) {
        handler
            .handle(ClusterEvent::flavor_applied(ResourceFlavor::new("default")))
            .unwrap();
        handler.handle(ClusterEvent::cluster_queue_applied(make_cq())).unwrap();
        handler
            .handle(ClusterEvent::local_queue_applied(LocalQueue::new("ns", "main", "cq")))
            .unwrap();
    }

    fn cpu_total(cache: &Cache) -> i64 {
        cache.snapshot().total("cq", "cpu", "default")
    }

    #[test]
    fn test_pending_workload_is_queued() {
        let (mut handler, _cache, queues) = create_test_handler();
        setup(&mut handler);
        handler
            .handle(ClusterEvent::workload_applied(make_workload("wl", "1")))
            .unwrap();
        assert_eq!(queues.pending_count("cq"), 1);
        assert_eq!(handler.unqueued_count(), 0);
    }

    #[test]
    fn test_workload_waits_for_local_queue() {
        let (mut handler, _cache, queues) = create_test_handler();
        handler
            .handle(ClusterEvent::workload_applied(make_workload("early", "1")))
            .unwrap();
        assert_eq!(handler.unqueued_count(), 1);

        setup(&mut handler);
        assert_eq!(handler.unqueued_count(), 0);
        assert!(queues.contains(&ObjectKey::new("ns", "early")));
    }

    #[test]
    fn test_workload_waits_for_cluster_queue_of_local_queue() {
        let (mut handler, _cache, queues) = create_test_handler();
        handler
            .handle(ClusterEvent::flavor_applied(ResourceFlavor::new("default")))
            .unwrap();
        handler
            .handle(ClusterEvent::local_queue_applied(LocalQueue::new("ns", "main", "cq")))
            .unwrap();
        handler
            .handle(ClusterEvent::workload_applied(make_workload("early", "1")))
            .unwrap();
        assert!(queues.has_local_queue(&ObjectKey::new("ns", "main")));
        assert_eq!(handler.unqueued_count(), 1);
        assert!(!queues.contains(&ObjectKey::new("ns", "early")));

        handler.handle(ClusterEvent::cluster_queue_applied(make_cq())).unwrap();
        assert_eq!(handler.unqueued_count(), 0);
        assert_eq!(queues.pending_count("cq"), 1);
    }

    #[test]
    fn test_finished_twice_releases_once() {
        let (mut handler, cache, _queues) = create_test_handler();
        setup(&mut handler);
        handler
            .handle(ClusterEvent::workload_applied(admitted(make_workload("a", "1"))))
            .unwrap();
        handler
            .handle(ClusterEvent::workload_applied(admitted(make_workload("b", "2"))))
            .unwrap();
        assert_eq!(cpu_total(&cache), 3000);

        let key = ObjectKey::new("ns", "a");
        handler.handle(ClusterEvent::workload_finished(key.clone())).unwrap();
        handler.handle(ClusterEvent::workload_finished(key)).unwrap();
        assert_eq!(cpu_total(&cache), 2000);
    }

    #[test]
    fn test_finished_condition_releases_quota() {
        let (mut handler, cache, _queues) = create_test_handler();
        setup(&mut handler);
        let mut wl = admitted(make_workload("wl", "1"));
        handler.handle(ClusterEvent::workload_applied(wl.clone())).unwrap();
        assert_eq!(cpu_total(&cache), 1000);

        wl.set_condition(CONDITION_FINISHED, "True", "Succeeded", "done", Utc::now());
        handler.handle(ClusterEvent::workload_applied(wl)).unwrap();
        assert_eq!(cpu_total(&cache), 0);
    }

    #[test]
    fn test_cleared_admission_requeues() {
        let (mut handler, cache, queues) = create_test_handler();
        setup(&mut handler);
        handler
            .handle(ClusterEvent::workload_applied(admitted(make_workload("wl", "1"))))
            .unwrap();
        assert_eq!(cpu_total(&cache), 1000);

        handler
            .handle(ClusterEvent::workload_applied(make_workload("wl", "1")))
            .unwrap();
        assert_eq!(cpu_total(&cache), 0);
        assert!(queues.contains(&ObjectKey::new("ns", "wl")));
    }

    #[test]
    fn test_deleted_workload_releases_quota() {
        let (mut handler, cache, _queues) = create_test_handler();
        setup(&mut handler);
        let wl = admitted(make_workload("wl", "1"));
        handler.handle(ClusterEvent::workload_applied(wl.clone())).unwrap();
        handler.handle(ClusterEvent::workload_deleted(wl)).unwrap();
        assert_eq!(cpu_total(&cache), 0);
        assert!(cache.admitted_in(&ObjectKey::new("ns", "wl")).is_none());
    }

    #[test]
    fn test_cluster_queue_delete_and_return() {
        let (mut handler, cache, queues) = create_test_handler();
        setup(&mut handler);
        handler
            .handle(ClusterEvent::workload_applied(make_workload("wl", "1")))
            .unwrap();

        handler.handle(ClusterEvent::cluster_queue_deleted(make_cq())).unwrap();
        assert!(!cache.contains_cluster_queue("cq"));
        assert!(queues.heads().is_empty());

        handler.handle(ClusterEvent::cluster_queue_applied(make_cq())).unwrap();
        assert_eq!(queues.pending_count("cq"), 1);
    }

    #[test]
    fn test_local_queue_delete_holds_workloads() {
        let (mut handler, _cache, queues) = create_test_handler();
        setup(&mut handler);
        handler
            .handle(ClusterEvent::workload_applied(make_workload("wl", "1")))
            .unwrap();

        let lq = LocalQueue::new("ns", "main", "cq");
        handler.handle(ClusterEvent::local_queue_deleted(lq.clone())).unwrap();
        assert_eq!(queues.pending_count("cq"), 0);
        assert_eq!(handler.unqueued_count(), 1);

        handler.handle(ClusterEvent::local_queue_applied(lq)).unwrap();
        assert_eq!(queues.pending_count("cq"), 1);
        assert_eq!(handler.unqueued_count(), 0);
    }

    #[test]
    fn test_invalid_cluster_queue_is_reported() {
        let (mut handler, cache, _queues) = create_test_handler();
        let cq = ClusterQueue::new("bad").with_resource(ResourceSpec::new(
            "cpu",
            vec![FlavorQuota::new("default", "4").with_max("2")],
        ));
        assert!(handler.handle(ClusterEvent::cluster_queue_applied(cq)).is_err());
        assert!(!cache.contains_cluster_queue("bad"));
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (mut handler, cache, queues) = create_test_handler();
        let (tx, rx) = event_channel(&EventBusConfig::default());
        let token = CancellationToken::new();

        let task = tokio::spawn(async move {
            handler.run(rx, token).await.unwrap();
            handler
        });

        send_event(&tx, ClusterEvent::flavor_applied(ResourceFlavor::new("default")))
            .await
            .unwrap();
        send_event(&tx, ClusterEvent::cluster_queue_applied(make_cq()))
            .await
            .unwrap();
        send_event(&tx, ClusterEvent::local_queue_applied(LocalQueue::new("ns", "main", "cq")))
            .await
            .unwrap();
        send_event(&tx, ClusterEvent::workload_applied(make_workload("wl", "1")))
            .await
            .unwrap();
        drop(tx);

        let handler = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handler.unqueued_count(), 0);
        assert!(cache.has_flavor("default"));
        assert_eq!(queues.pending_count("cq"), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (tx, rx) = event_channel(&EventBusConfig { capacity: 1 });
        drop(rx);
        let err = send_event(&tx, ClusterEvent::workload_finished(ObjectKey::new("ns", "wl")))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ChannelClosed { .. }));
    }
}
