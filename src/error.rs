//! Error types for the conformance harness
//!
//! The taxonomy separates the outcomes a probe can observe (an object is
//! absent, a response could not be decoded, a condition has not converged)
//! from hard scenario failures (timeouts, contradicted invariants, bad
//! configuration).

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Observation Errors
    // =========================================================================
    /// The object or logical volume does not exist. Deletion checks treat
    /// this as the expected terminal state.
    #[error("{kind} {name} not found{}", scope(.namespace))]
    NotFound {
        kind: String,
        namespace: Option<String>,
        name: String,
    },

    /// The external system answered, but its output could not be decoded.
    #[error("Malformed response for {what}: {reason}")]
    MalformedResponse { what: String, reason: String },

    /// The object exists and decodes, but has not reached the awaited state.
    #[error("Not converged: {0}")]
    NotConverged(String),

    // =========================================================================
    // External Call Errors
    // =========================================================================
    #[error("External call failed: {command}: {reason}")]
    ExternalCallFailed { command: String, reason: String },

    // =========================================================================
    // Scenario Failures
    // =========================================================================
    /// A wait never converged; carries the last probe error for diagnosis.
    #[error("Timed out after {timeout:?} ({attempts} attempts) waiting for {what}: {last_error}")]
    TimeoutExceeded {
        what: String,
        timeout: Duration,
        attempts: u32,
        #[source]
        last_error: Box<Error>,
    },

    /// An observed fact contradicts the placement/capacity model.
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Quantity parse error: {0}")]
    QuantityParse(String),

    #[error("Manifest encoding error: {0}")]
    ManifestEncoding(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn scope(namespace: &Option<String>) -> String {
    match namespace {
        Some(ns) => format!(" in namespace {}", ns),
        None => String::new(),
    }
}

/// What the poller does with a probe error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeAction {
    /// Condition not yet met; try again after the interval
    Retry,
    /// Retrying cannot help; end the wait early (only honoured when the
    /// wait policy opts in)
    Abort,
}

impl Error {
    /// Build a `NotFound` for a namespaced or cluster-scoped object
    pub fn not_found(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Determine what the poller should do with this error
    pub fn action(&self) -> ProbeAction {
        match self {
            // Eventual-consistency outcomes
            Error::NotFound { .. }
            | Error::NotConverged(_)
            | Error::ExternalCallFailed { .. }
            | Error::Io(_) => ProbeAction::Retry,

            // Decode, model and configuration problems do not heal by waiting
            Error::MalformedResponse { .. }
            | Error::AssertionFailed(_)
            | Error::Configuration(_)
            | Error::QuantityParse(_)
            | Error::ManifestEncoding(_) => ProbeAction::Abort,

            // A nested wait already spent its budget
            Error::TimeoutExceeded { .. } => ProbeAction::Abort,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.action() == ProbeAction::Retry
    }

    /// Check if this error reports an absent object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// The innermost probe error of a timeout, or the error itself
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::TimeoutExceeded { last_error, .. } => last_error.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for the harness
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::not_found("PersistentVolumeClaim", Some("ns"), "vol");
        assert_eq!(err.action(), ProbeAction::Retry);

        let err = Error::MalformedResponse {
            what: "lvs".into(),
            reason: "3 columns".into(),
        };
        assert_eq!(err.action(), ProbeAction::Abort);

        let err = Error::ExternalCallFailed {
            command: "kubectl get pvc".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("PersistentVolumeClaim", Some("snap-test-x"), "vol");
        assert_eq!(
            err.to_string(),
            "PersistentVolumeClaim vol not found in namespace snap-test-x"
        );

        let err = Error::not_found("LogicalVolume", None, "lv-1");
        assert_eq!(err.to_string(), "LogicalVolume lv-1 not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_timeout_keeps_last_error() {
        let err = Error::TimeoutExceeded {
            what: "claim vol bound".into(),
            timeout: Duration::from_secs(1),
            attempts: 3,
            last_error: Box::new(Error::NotConverged("claim vol is Pending".into())),
        };
        assert!(err.to_string().contains("claim vol is Pending"));
        assert!(matches!(err.root_cause(), Error::NotConverged(_)));
        assert!(!err.is_retryable());
    }
}
