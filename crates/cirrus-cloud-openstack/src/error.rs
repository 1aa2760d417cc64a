//! OpenStack SDK error types

use cirrus_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpenStackError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("OpenStack API error: {0}")]
    Api(String),
}

impl From<OpenStackError> for CloudError {
    fn from(e: OpenStackError) -> Self {
        match e {
            OpenStackError::NotFound(msg) => CloudError::NotFound(msg),
            OpenStackError::Conflict(msg) => CloudError::Conflict(msg),
            OpenStackError::RateLimited(msg) => CloudError::Transient(msg),
            OpenStackError::Timeout(msg) => CloudError::Timeout(msg),
            OpenStackError::Unauthorized(msg) => CloudError::AuthenticationFailed(msg),
            OpenStackError::Api(msg) => CloudError::ApiError(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenStackError>;
