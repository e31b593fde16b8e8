//! Admiral Queue - pending workload queues
//!
//! This crate provides:
//! - LocalQueue to ClusterQueue routing
//! - Per-ClusterQueue pending sets ordered by creation time
//! - Head-of-line retrieval and wake-up signalling for the scheduler

pub mod manager;

pub use manager::{Manager, QueuedWorkload};
