use admiral_cache::AssignmentOutcome;
use admiral_core::ObjectKey;
use admiral_queue::QueuedWorkload;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Evaluation priority of a candidate within a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    /// Does not fit; handled first so BestEffortFIFO queues can offer
    /// their next workload before any quota is committed
    NoFit,
    /// Fits within the cluster queue's own min quota
    Fits,
    /// Fits only by borrowing from the cohort
    Borrows,
}

impl Rank {
    pub fn of(outcome: &AssignmentOutcome) -> Self {
        match outcome {
            AssignmentOutcome::NoFit { .. } => Rank::NoFit,
            AssignmentOutcome::Fits(a) if a.borrows => Rank::Borrows,
            AssignmentOutcome::Fits(_) => Rank::Fits,
        }
    }
}

/// A head-of-line workload with its fit evaluation
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: QueuedWorkload,
    pub outcome: AssignmentOutcome,
    pub rank: Rank,
}

impl Candidate {
    pub fn new(entry: QueuedWorkload, outcome: AssignmentOutcome) -> Self {
        let rank = Rank::of(&outcome);
        Self {
            entry,
            outcome,
            rank,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.entry.info.key
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.entry.info.creation_timestamp
    }

    fn sort_key(&self) -> (Rank, DateTime<Utc>, &ObjectKey) {
        (self.rank, self.timestamp(), self.key())
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so that a max-heap pops the candidate to evaluate first:
// lowest rank, then oldest, then smallest key.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.sort_key().cmp(&self.sort_key())
    }
}

/// What happened in one scheduling round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// Candidates evaluated, including BestEffortFIFO follow-ups
    pub considered: usize,
    pub admitted: usize,
    /// Admissions rolled back after the write failed
    pub rolled_back: usize,
}
