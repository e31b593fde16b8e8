// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The admission could not be written and was rolled back
    #[error("Admission of workload {workload} failed: {reason}")]
    #[diagnostic(
        code(scheduler::admission_failed),
        help("The quota was released; the workload is pending again")
    )]
    AdmissionFailed {
        #[allow(unused)]
        workload: String,
        #[allow(unused)]
        reason: String,
    },

    /// An internal channel was closed
    #[error("Channel closed: {channel}")]
    #[diagnostic(
        code(scheduler::channel_closed),
        help("The receiving task has stopped, usually during shutdown")
    )]
    ChannelClosed {
        #[allow(unused)]
        channel: String,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("See the wrapped error for details")
    )]
    CoreError(#[from] admiral_core::AdmiralError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create an AdmissionFailed error
    pub fn admission_failed(workload: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AdmissionFailed {
            workload: workload.into(),
            reason: reason.into(),
        }
    }

    /// Create a ChannelClosed error
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
