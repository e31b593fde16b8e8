// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Admiral operations
#[derive(Error, Debug, Diagnostic)]
pub enum AdmiralError {
    /// Malformed ClusterQueue resource/flavor declaration
    #[error("Invalid spec for {resource_key}: {reason}")]
    #[diagnostic(
        code(admiral::invalid_spec),
        help("{suggestion}")
    )]
    InvalidSpec {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// A ClusterQueue references a flavor that is not registered
    #[error("Cluster queue {cluster_queue} references unknown flavor {flavor}")]
    #[diagnostic(
        code(admiral::unknown_flavor),
        help("Create the ResourceFlavor {flavor}; until then its quota counts as zero")
    )]
    UnknownFlavor {
        #[allow(unused)]
        cluster_queue: String,
        #[allow(unused)]
        flavor: String,
    },

    /// A workload or local queue points at a queue that does not exist
    #[error("Unknown queue: {queue}")]
    #[diagnostic(
        code(admiral::unknown_queue),
        help("Create the LocalQueue and the ClusterQueue it points to before submitting workloads")
    )]
    UnknownQueue {
        #[allow(unused)]
        queue: String,
    },

    /// The candidate workload or its cluster queue changed between evaluation and commit
    #[error("Concurrent invalidation of {resource_key}: {reason}")]
    #[diagnostic(
        code(admiral::concurrent_invalidation),
        help("The decision was dropped; the workload is evaluated again in a later round")
    )]
    ConcurrentInvalidation {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        reason: String,
    },

    /// Usage accounting disagrees with the reported state
    #[error("Usage inconsistency in cluster queue {cluster_queue}: {details}")]
    #[diagnostic(
        code(admiral::inconsistency),
        help("Usage was clamped at zero. This points at a duplicated or out-of-order event upstream")
    )]
    Inconsistency {
        #[allow(unused)]
        cluster_queue: String,
        #[allow(unused)]
        details: String,
    },

    /// Resource not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(admiral::resource_not_found),
        help("Verify the resource name and namespace are correct")
    )]
    ResourceNotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// Resource already exists
    #[error("Resource already exists: {resource_key}")]
    #[diagnostic(
        code(admiral::resource_already_exists),
        help("Update the existing resource, or delete it first")
    )]
    ResourceAlreadyExists {
        #[allow(unused)]
        resource_key: String,
    },

    /// Validation failed
    #[error("Validation failed for {resource_type}: {details}")]
    #[diagnostic(
        code(admiral::validation_failed),
        help("{help_text}")
    )]
    ValidationFailed {
        #[allow(unused)]
        resource_type: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(admiral::serialization_error),
        help("Ensure the manifest is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(admiral::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Admiral operations
pub type Result<T> = std::result::Result<T, AdmiralError>;

impl AdmiralError {
    /// Create an InvalidSpec error
    pub fn invalid_spec(
        resource_key: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidSpec {
            resource_key: resource_key.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an UnknownFlavor error
    pub fn unknown_flavor(cluster_queue: impl Into<String>, flavor: impl Into<String>) -> Self {
        Self::UnknownFlavor {
            cluster_queue: cluster_queue.into(),
            flavor: flavor.into(),
        }
    }

    /// Create an UnknownQueue error
    pub fn unknown_queue(queue: impl Into<String>) -> Self {
        Self::UnknownQueue {
            queue: queue.into(),
        }
    }

    /// Create a ConcurrentInvalidation error
    pub fn concurrent_invalidation(
        resource_key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ConcurrentInvalidation {
            resource_key: resource_key.into(),
            reason: reason.into(),
        }
    }

    /// Create an Inconsistency error
    pub fn inconsistency(cluster_queue: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Inconsistency {
            cluster_queue: cluster_queue.into(),
            details: details.into(),
        }
    }

    /// Create a ResourceNotFound error
    pub fn resource_not_found(resource_key: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ResourceAlreadyExists error
    pub fn resource_already_exists(resource_key: impl Into<String>) -> Self {
        Self::ResourceAlreadyExists {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ValidationFailed error
    pub fn validation_failed(
        resource_type: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::ValidationFailed {
            resource_type: resource_type.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the scheduler should retry the affected workload in a later round
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentInvalidation { .. } | Self::UnknownFlavor { .. }
        )
    }
}
