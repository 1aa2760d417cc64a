//! Cloud connector error types

use thiserror::Error;

/// Cloud connector errors
///
/// Cloneable so that a single failure can be reported for every node of a
/// batch that it affected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloudError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("{0}")]
    IncompatibleCredentials(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("No instance type satisfies the constraints of system {0}")]
    ConstraintUnsatisfiable(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CloudError {
    /// Errors worth retrying after a pause (rate limits, locks, timeouts)
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_) | CloudError::Timeout(_))
    }

    /// The resource is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    /// Failures that will not change by launching again
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CloudError::NotFound(_)
                | CloudError::Conflict(_)
                | CloudError::ConstraintUnsatisfiable(_)
                | CloudError::IncompatibleCredentials(_)
                | CloudError::AuthenticationFailed(_)
                | CloudError::UnsupportedOperation(_)
                | CloudError::InvalidConfig(_)
                | CloudError::InvalidUri(_)
                | CloudError::Cancelled(_)
        )
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CloudError::Timeout(e.to_string())
        } else {
            CloudError::Http(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
