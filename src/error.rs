//! Error taxonomy for the provider registry
//!
//! Every fallible library operation returns [`RegistryResult`]. Upstream
//! failures keep their own type so the health and balance jobs can tell a
//! rejected credential apart from a slow or broken upstream.

use thiserror::Error;

/// Failures talking to the upstream provider API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream request timed out after {0}s")]
    Timeout(u64),

    #[error("upstream rejected the credential (status {0})")]
    InvalidCredential(u16),

    #[error("upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    /// The upstream told us the credential itself is no longer valid
    pub fn is_invalid_credential(&self) -> bool {
        matches!(self, UpstreamError::InvalidCredential(_))
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("owner {0} already has a registered provider")]
    DuplicateOwner(String),

    #[error("this credential is already registered to another provider")]
    DuplicateCredential,

    #[error("credential decryption failed: {0}")]
    Decryption(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl RegistryError {
    /// Owner or credential collision at registration time
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            RegistryError::DuplicateOwner(_) | RegistryError::DuplicateCredential
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        RegistryError::Validation(msg.into())
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
