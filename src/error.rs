//! Error types for the Snapshot Mover Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Optimistic concurrency conflict on write
    #[error("Write conflict on {0}")]
    Conflict(String),

    /// A referenced object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Validation error
    #[error("{0}")]
    Validation(String),

    /// Desired state could not be computed from the available inputs
    #[error("Failed to build {kind}: {reason}")]
    Build { kind: String, reason: String },

    /// The replication engine reported a failed synchronization
    #[error("Replication failed: {0}")]
    Replication(String),

    /// Derived resources were still present when the cleanup deadline elapsed
    #[error("Cleanup did not converge, resources still present: {}", .0.join(", "))]
    CleanupTimeout(Vec<String>),

    /// Work was aborted by a shutdown signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a not-found error for a kind/name pair
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a desired-state build error
    pub fn build(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Build {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Errors that are resolved by reconciling again rather than by failing the workflow
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Conflict(_) | Error::NotFound { .. } | Error::Cancelled
        )
    }

    /// Errors that should not be surfaced into the workflow's condition
    pub fn is_silent(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_verbatim() {
        let err = Error::validation("vsb protected ns cannot be empty");
        assert_eq!(err.to_string(), "vsb protected ns cannot be empty");
        assert!(!err.is_transient());
    }

    #[test]
    fn conflicts_are_transient_and_silent() {
        let err = Error::Conflict("Secret ns/foo".to_string());
        assert!(err.is_transient());
        assert!(err.is_silent());
    }

    #[test]
    fn not_found_is_transient_but_reported() {
        let err = Error::not_found("VolumeSnapshot", "ns/snap");
        assert!(err.is_transient());
        assert!(!err.is_silent());
        assert_eq!(err.to_string(), "VolumeSnapshot ns/snap not found");
    }

    #[test]
    fn cleanup_timeout_names_leftovers() {
        let err = Error::CleanupTimeout(vec!["pvc ns/a".to_string(), "secret ns/b".to_string()]);
        assert_eq!(
            err.to_string(),
            "Cleanup did not converge, resources still present: pvc ns/a, secret ns/b"
        );
        assert!(!err.is_transient());
    }
}
