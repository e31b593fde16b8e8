//! Admiral Cache - quota accounting for cluster queues and cohorts
//!
//! This crate provides:
//! - The resource flavor registry
//! - Cluster queue and cohort usage counters
//! - Flavor assignment and atomic assign/release of quota
//! - Flavor predicates (taints, node selectors)
//! - Usage snapshots for reporting

pub mod assignment;
pub mod cache;
pub mod cluster_queue;
pub mod cohort;
pub mod filter;
pub mod snapshot;

// Re-export commonly used types
pub use assignment::{Assignment, AssignmentOutcome, PodSetAssignment};
pub use cache::Cache;
pub use cluster_queue::{ClusterQueueConfig, Usage};
pub use filter::{default_filters, FilterResult, FlavorPredicate};
pub use snapshot::{CacheSnapshot, ClusterQueueUsage, FlavorUsage};
