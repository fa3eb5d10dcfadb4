//! Error types for provisioning and rollback

use thiserror::Error;

/// Errors surfaced by the orchestrator, the ledger and the ledger store
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(
        "Deployment '{0}' already has a rollback ledger. Roll it back first or choose another name"
    )]
    DeploymentExists(String),

    #[error("Rollback ledger not found: {0}")]
    NotFound(String),

    #[error("Rollback ledger '{key}' is corrupt: {reason}")]
    CorruptData { key: String, reason: String },

    #[error("Failed to persist rollback ledger '{key}': {reason}")]
    Persistence { key: String, reason: String },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Errors reported by a resource provider (the cloud API)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("API error [{code}]: {message}")]
    Api { code: String, message: String },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Local I/O error: {0}")]
    LocalIo(String),
}

impl ProviderError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the error means the target resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ProviderError::AlreadyExists(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
