//! Error types for the cleanup operator
//!
//! Errors carry enough context (namespace, resource, operation) to be
//! surfaced verbatim in the `Cleanup` status without consulting logs.

use thiserror::Error;

/// Main error type for cleanup operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a `Cleanup` spec
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the Cleanup resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.namespaces")
        field: Option<String>,
    },

    /// Operator configuration could not be loaded or parsed
    #[error("configuration error [{source_name}]: {message}")]
    Config {
        /// Where the bad value came from (file path, env var name)
        source_name: String,
        /// Description of what failed
        message: String,
    },

    /// A cluster API call exceeded its deadline
    #[error("timed out after {seconds}s: {operation}")]
    Timeout {
        /// Name of the operation that timed out
        operation: String,
        /// The deadline that was exceeded
        seconds: u64,
    },
}

impl Error {
    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error
    pub fn config(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// HTTP status code of the underlying API error, if any
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// The object does not exist (404)
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// An optimistic-concurrency or precondition conflict (409)
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// The controller lacks permission (401/403)
    pub fn is_forbidden(&self) -> bool {
        matches!(self.api_code(), Some(401) | Some(403))
    }

    /// Check if this error is retryable
    ///
    /// Throttling (429), server errors (5xx), transport failures and
    /// timeouts are transient. Every other 4xx needs a human or a changed
    /// world before it can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 429 || ae.code >= 500,
                _ => true,
            },
            Error::Timeout { .. } => true,
            Error::Validation { .. } | Error::Config { .. } => false,
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube {
        source: kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} ({})", reason, code),
            reason: reason.to_string(),
            code,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a resource deleted concurrently by someone else shows up as 404
    /// and must be recognised so the executor can treat it as success.
    #[test]
    fn story_not_found_is_classified() {
        let err = api_error(404, "NotFound");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn story_authorization_errors_are_not_retried() {
        for code in [401, 403] {
            let err = api_error(code, "Forbidden");
            assert!(err.is_forbidden());
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn story_transient_errors_are_retried() {
        assert!(api_error(429, "TooManyRequests").is_retryable());
        assert!(api_error(500, "InternalError").is_retryable());
        assert!(api_error(503, "ServiceUnavailable").is_retryable());
        assert!(Error::timeout("list pods", 30).is_retryable());
    }

    #[test]
    fn story_conflict_is_detected_but_not_blindly_retried() {
        let err = api_error(409, "Conflict");
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_error_carries_field() {
        let err = Error::validation_for_field("nightly", "spec.namespaces", "must not be empty");
        assert!(err.to_string().contains("nightly"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.namespaces"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_error_names_its_source() {
        let err = Error::config("CLEANUP_INTERVAL", "not a number");
        assert!(err.to_string().contains("[CLEANUP_INTERVAL]"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_non_api_errors_have_no_code() {
        let err = Error::config("config.yaml", "bad yaml");
        assert_eq!(err.api_code(), None);
        assert!(!err.is_not_found());
    }
}
