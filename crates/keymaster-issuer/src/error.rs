//! Error types for the issuance engine

use keymaster_core::ConfigError;
use thiserror::Error;

/// Result type for issuance operations
pub type Result<T> = std::result::Result<T, IssuanceError>;

/// What a single backend reports when it cannot build or issue
#[derive(Error, Debug)]
pub enum BackendError {
    /// Backend parameters are unusable (wrong variant, bad CA material)
    #[error("Invalid backend config: {0}")]
    InvalidConfig(String),

    /// The cloud token service refused or failed the request
    #[error("STS error: {0}")]
    Sts(String),

    /// SSH key generation or certificate signing failed
    #[error("SSH signing error: {0}")]
    Ssh(String),

    /// X.509 key generation or certificate signing failed
    #[error("Certificate signing error: {0}")]
    Certificate(String),

    /// Any other backend failure
    #[error("Issuance failed: {0}")]
    Failed(String),
}

impl From<ssh_key::Error> for BackendError {
    fn from(err: ssh_key::Error) -> Self {
        BackendError::Ssh(err.to_string())
    }
}

impl From<rcgen::Error> for BackendError {
    fn from(err: rcgen::Error) -> Self {
        BackendError::Certificate(err.to_string())
    }
}

/// Errors from delivery wrapping
#[derive(Error, Debug)]
pub enum WrapError {
    #[error("Failed to serialize credential: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Key service error: {0}")]
    KeyService(String),
}

/// Errors from building or running an [`Issuer`](crate::Issuer)
#[derive(Error, Debug)]
pub enum IssuanceError {
    /// Role, backend or policy did not resolve
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A backend could not be constructed from its config
    #[error("Failed to build issuer for '{backend}': {source}")]
    Build {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// A backend failed during issuance; `position` is 1-based in role order
    #[error("Issuer {position} ('{backend}') failed: {source}")]
    Backend {
        position: usize,
        backend: String,
        #[source]
        source: BackendError,
    },

    /// The role requires delivery wrapping but no key wrapper is configured
    #[error("Role requires wrapping with '{key_id}' but no key wrapper is configured")]
    WrapperUnavailable { key_id: String },

    /// Wrapping an issued credential failed
    #[error("Failed to wrap credential '{backend}': {source}")]
    Wrap {
        backend: String,
        #[source]
        source: WrapError,
    },
}

impl IssuanceError {
    /// Name of the backend the failure is attributed to, if any
    pub fn backend(&self) -> Option<&str> {
        match self {
            IssuanceError::Build { backend, .. }
            | IssuanceError::Backend { backend, .. }
            | IssuanceError::Wrap { backend, .. } => Some(backend),
            _ => None,
        }
    }
}
