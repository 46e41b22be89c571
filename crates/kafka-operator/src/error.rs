//! Error types for the Kafka operator core

use crate::admin::BrokerError;
use thiserror::Error;

/// Errors that can occur during convergence and config generation
#[derive(Error, Debug)]
pub enum OperatorError {
    /// The cluster administration endpoint could not be reached
    #[error("Cluster admin unavailable: {0}")]
    AdminUnavailable(String),

    /// Topic does not exist in the cluster
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// Topic already exists in the cluster
    #[error("Topic already exists: {0}")]
    TopicAlreadyExists(String),

    /// Partition counts can only grow
    #[error(
        "Cannot decrease partitions of topic {topic} from {current} to {desired}"
    )]
    UnsupportedPartitionDecrease {
        topic: String,
        current: i32,
        desired: i32,
    },

    /// Some ACL matches were not removed; others may already be gone
    #[error(
        "Revoking ACLs for {principal} partially failed: {removed} removed, {failed} failed (first error: {first_error})"
    )]
    PartialRevocationFailure {
        principal: String,
        removed: usize,
        failed: usize,
        first_error: BrokerError,
    },

    /// Access type other than read or write
    #[error("Unsupported access intent kind: {0}")]
    UnsupportedIntentKind(String),

    /// Listener set is inconsistent (inter-broker listener, ports, names)
    #[error("Listener configuration error: {0}")]
    ListenerConfiguration(String),

    /// Cluster-reported per-request error, carried verbatim
    #[error("{context}: {error}")]
    Broker { context: String, error: BrokerError },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            OperatorError::AdminUnavailable(_) | OperatorError::PartialRevocationFailure { .. } => {
                true
            }
            OperatorError::Broker { error, .. } => error.is_retriable(),
            _ => false,
        }
    }

    /// Get a suggested requeue delay for retryable errors
    pub fn requeue_delay(&self) -> Option<std::time::Duration> {
        match self {
            // Revocation must be re-run to confirm convergence, so come back quickly
            OperatorError::PartialRevocationFailure { .. } => {
                Some(std::time::Duration::from_secs(5))
            }
            e if e.is_retryable() => Some(std::time::Duration::from_secs(30)),
            _ => None,
        }
    }

    /// Whether this error means the topic is absent, either locally detected
    /// or reported by the cluster
    pub fn is_topic_not_found(&self) -> bool {
        match self {
            OperatorError::TopicNotFound(_) => true,
            OperatorError::Broker { error, .. } => error.is_unknown_topic(),
            _ => false,
        }
    }

    /// Stable machine-readable kind, used as the status condition reason
    pub fn reason(&self) -> &'static str {
        match self {
            OperatorError::AdminUnavailable(_) => "AdminUnavailable",
            OperatorError::TopicNotFound(_) => "TopicNotFound",
            OperatorError::TopicAlreadyExists(_) => "TopicAlreadyExists",
            OperatorError::UnsupportedPartitionDecrease { .. } => "UnsupportedPartitionDecrease",
            OperatorError::PartialRevocationFailure { .. } => "PartialRevocationFailure",
            OperatorError::UnsupportedIntentKind(_) => "UnsupportedIntentKind",
            OperatorError::ListenerConfiguration(_) => "ListenerConfigurationError",
            OperatorError::Broker { error, .. } if error.is_unknown_topic() => "TopicNotFound",
            OperatorError::Broker { .. } => "BrokerError",
            OperatorError::InvalidConfig(_) => "InvalidConfig",
            OperatorError::ValidationError(_) => "ValidationFailed",
            OperatorError::SerializationError(_) | OperatorError::YamlError(_) => {
                "SerializationError"
            }
        }
    }
}

/// Flatten `validator` errors, including nested ones, into a single message
pub(crate) fn format_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_validation_errors("", errors, &mut messages);
    messages.sort();
    messages.join("; ")
}

fn collect_validation_errors(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                out.extend(errs.iter().map(|e| match &e.message {
                    Some(msg) => format!("{}: {}", path, msg),
                    None => format!("{}: {}", path, e.code),
                }));
            }
            ValidationErrorsKind::Struct(nested) => collect_validation_errors(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_validation_errors(&format!("{}[{}]", path, index), nested, out);
                }
            }
        }
    }
}
