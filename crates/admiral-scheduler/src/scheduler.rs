use crate::applier::{AdmissionApplier, ApplyError, ConditionUpdate};
use crate::types::{Candidate, RoundStats};
use crate::{Result, SchedulerError};
use admiral_cache::{Assignment, AssignmentOutcome, Cache};
use admiral_core::{QueueingStrategy, CONDITION_ADMITTED};
use admiral_queue::{Manager, QueuedWorkload};
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Longest wait between rounds when nothing was admitted
    pub schedule_interval: Duration,
    /// Extra attempts for a transient admission write failure
    pub apply_retries: u32,
    /// Backoff before the first retry, doubled after each attempt
    pub apply_retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(1),
            apply_retries: 3,
            apply_retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Result of trying to commit one candidate
enum Commit {
    Admitted,
    /// Does not fit any more, e.g. an earlier admission this round took
    /// the cohort headroom
    NoFit(String),
    /// Decision dropped; the workload changed or went away
    Dropped,
    /// Write failed; quota released and workload pending again
    RolledBack,
}

/// Workload admission scheduler
pub struct Scheduler {
    cache: Arc<Cache>,
    queues: Arc<Manager>,
    applier: Arc<dyn AdmissionApplier>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        cache: Arc<Cache>,
        queues: Arc<Manager>,
        applier: Arc<dyn AdmissionApplier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            cache,
            queues,
            applier,
            config,
        }
    }

    /// Run the scheduler loop until cancelled.
    ///
    /// A round that started always finishes, including its admission
    /// writes or their rollback.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting scheduler (interval: {:?})",
            self.config.schedule_interval
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = self.queues.wait_for_heads() => {}
            }

            let stats = self.schedule_round().await;
            if stats.admitted > 0 {
                continue;
            }

            // Nothing moved; wait for a state change or the interval
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = self.queues.wait() => {}
                _ = sleep(self.config.schedule_interval) => {}
            }
        }
    }

    /// Run a single scheduling round.
    ///
    /// Heads of all cluster queues are evaluated together. Candidates that
    /// fit within their own min go before those that need to borrow; ties
    /// go to the oldest workload. Each cluster queue admits at most one
    /// workload per round.
    pub async fn schedule_round(&self) -> RoundStats {
        let mut stats = RoundStats::default();
        let heads = self.queues.heads();
        if heads.is_empty() {
            debug!("No pending workloads");
            return stats;
        }
        debug!("Running scheduling round with {} heads", heads.len());

        let mut heap: BinaryHeap<Candidate> = heads.into_iter().map(|h| self.evaluate(h)).collect();
        let mut finished: HashSet<String> = HashSet::new();

        while let Some(candidate) = heap.pop() {
            let cluster_queue = candidate.entry.cluster_queue.clone();
            if finished.contains(&cluster_queue) {
                continue;
            }
            stats.considered += 1;

            let reason = match candidate.outcome {
                AssignmentOutcome::NoFit { reason } => reason,
                AssignmentOutcome::Fits(_) => match self.commit(&candidate.entry).await {
                    Commit::Admitted => {
                        stats.admitted += 1;
                        finished.insert(cluster_queue);
                        continue;
                    }
                    Commit::RolledBack => {
                        stats.rolled_back += 1;
                        finished.insert(cluster_queue);
                        continue;
                    }
                    Commit::Dropped => {
                        finished.insert(cluster_queue);
                        continue;
                    }
                    Commit::NoFit(reason) => reason,
                },
            };

            self.mark_pending(&candidate.entry, &reason).await;
            match candidate.entry.strategy {
                QueueingStrategy::StrictFIFO => {
                    debug!(
                        "Cluster queue {} blocked by head {}",
                        cluster_queue,
                        candidate.entry.key()
                    );
                    finished.insert(cluster_queue);
                }
                QueueingStrategy::BestEffortFIFO => match self.queues.next_after(&candidate.entry) {
                    Some(next) => heap.push(self.evaluate(next)),
                    None => {
                        finished.insert(cluster_queue);
                    }
                },
            }
        }

        if stats.admitted > 0 || stats.rolled_back > 0 {
            info!(
                "Scheduling round: {} considered, {} admitted, {} rolled back",
                stats.considered, stats.admitted, stats.rolled_back
            );
        }
        stats
    }

    fn evaluate(&self, entry: QueuedWorkload) -> Candidate {
        let outcome = match self.cache.fits_and_assign(&entry.cluster_queue, &entry.info) {
            Ok(outcome) => outcome,
            Err(e) => AssignmentOutcome::no_fit(e.to_string()),
        };
        Candidate::new(entry, outcome)
    }

    /// Check again against current usage, charge the quota, take the
    /// workload out of its queue and write the admission
    async fn commit(&self, entry: &QueuedWorkload) -> Commit {
        let key = entry.key();

        let assignment = match self.cache.fits_and_assign(&entry.cluster_queue, &entry.info) {
            Ok(AssignmentOutcome::Fits(a)) => a,
            Ok(AssignmentOutcome::NoFit { reason }) => return Commit::NoFit(reason),
            Err(e) => return Commit::NoFit(e.to_string()),
        };

        if let Err(e) = self.cache.assign(key, &assignment) {
            debug!("Skipping workload {} this round: {}", key, e);
            return Commit::Dropped;
        }

        let Some(info) = self.queues.remove_if_current(key, entry.seq) else {
            // Deleted or updated since the round started
            self.cache.release(key);
            debug!("Workload {} changed before admission, decision dropped", key);
            return Commit::Dropped;
        };

        match self.apply_with_retries(entry, &assignment).await {
            Ok(()) => {
                info!(
                    "Admitted workload {} to cluster queue {} ({})",
                    key, entry.cluster_queue, assignment
                );
                let condition = ConditionUpdate::new(
                    CONDITION_ADMITTED,
                    "True",
                    "Admitted",
                    format!("Admitted by ClusterQueue {}", entry.cluster_queue),
                );
                if let Err(e) = self.applier.update_condition(key, condition).await {
                    warn!("Failed to set admitted condition on {}: {}", key, e);
                }
                Commit::Admitted
            }
            Err(ApplyError::NotFound(_)) => {
                self.cache.release(key);
                info!("Workload {} was deleted during admission", key);
                Commit::Dropped
            }
            Err(e) => {
                // Quota already returned means the workload was deleted,
                // finished or replaced while the write was in flight
                if self.cache.release(key).is_none() {
                    info!(
                        "Workload {} changed during admission, not requeueing: {}",
                        key, e
                    );
                    return Commit::Dropped;
                }
                let err = SchedulerError::admission_failed(key.to_string(), e.to_string());
                warn!("{}", err);
                if let Err(e) = self.queues.requeue_workload(info) {
                    error!("Failed to requeue workload {}: {}", key, e);
                }
                Commit::RolledBack
            }
        }
    }

    async fn apply_with_retries(&self, entry: &QueuedWorkload, assignment: &Assignment) -> std::result::Result<(), ApplyError> {
        let admission = assignment.to_admission();
        let mut backoff = self.config.apply_retry_backoff;
        let mut attempt = 0;

        loop {
            match self.applier.apply_admission(entry.key(), &admission).await {
                Err(ApplyError::Transient(reason)) if attempt < self.config.apply_retries => {
                    attempt += 1;
                    debug!(
                        "Transient failure admitting {} (attempt {}): {}",
                        entry.key(),
                        attempt,
                        reason
                    );
                    sleep(backoff).await;
                    backoff *= 2;
                }
                result => return result,
            }
        }
    }

    /// Report why a workload is still pending, once per distinct reason
    async fn mark_pending(&self, entry: &QueuedWorkload, reason: &str) {
        if !self.queues.set_pending_message(entry.key(), reason) {
            return;
        }
        debug!("Workload {} pending: {}", entry.key(), reason);
        let condition = ConditionUpdate::new(CONDITION_ADMITTED, "False", "Pending", reason);
        if let Err(e) = self.applier.update_condition(entry.key(), condition).await {
            debug!("Failed to set pending condition on {}: {}", entry.key(), e);
        }
    }
}
