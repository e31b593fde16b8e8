//! Admiral Scheduler - Workload admission
//!
//! This crate provides:
//! - The scheduling loop matching pending workloads to quota
//! - Inbound event handling for the cache and queue manager
//! - The outbound admission applier and an in-memory implementation
//! - Status reports

pub mod applier;
pub mod error;
pub mod handler;
pub mod report;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use applier::{AdmissionApplier, ApplyError, ConditionUpdate, InMemoryApplier};
pub use error::{Result, SchedulerError};
pub use handler::{event_channel, send_event, EventBusConfig, EventHandler};
pub use report::{ClusterQueueStatus, StatusReport};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use types::{Candidate, Rank, RoundStats};
