//! Error types for the Keymaster configuration model

use thiserror::Error;

/// Result type alias using ConfigError
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or querying a configuration snapshot
///
/// All of these are fatal: they abort before any network call is made.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A role, credential backend, policy or IdP name did not resolve
    #[error("{kind} '{name}' not found in config")]
    NotFound { kind: &'static str, name: String },

    /// A credential backend declared a kind no variant exists for
    #[error("credential backend '{name}' has unknown type '{kind}'")]
    UnknownBackendKind { name: String, kind: String },

    /// A kind-specific parameter block failed to parse
    #[error("credential backend '{name}' ({kind}): invalid config: {reason}")]
    BackendParse {
        name: String,
        kind: String,
        reason: String,
    },

    /// An IdP declared a type no variant exists for
    #[error("idp '{name}' has unknown type '{kind}'")]
    UnknownIdpKind { name: String, kind: String },

    /// An IdP parameter block failed to parse
    #[error("idp '{name}' ({kind}): invalid config: {reason}")]
    IdpParse {
        name: String,
        kind: String,
        reason: String,
    },

    /// A snapshot violated a cross-reference or range invariant
    #[error("invalid config: {0}")]
    Invalid(String),

    /// The snapshot document itself could not be parsed
    #[error("config parse error: {0}")]
    Parse(String),

    /// An embedded resource reference could not be dereferenced
    #[error("failed to load resource for {field}: {source}")]
    Resource {
        field: String,
        #[source]
        source: ResourceError,
    },
}

impl ConfigError {
    /// Shorthand for a failed lookup
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ConfigError::NotFound {
            kind,
            name: name.into(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Errors raised while dereferencing a resource URI
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("invalid resource uri '{0}'")]
    InvalidUri(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("no blob store configured to fetch s3://{bucket}/{key}")]
    NoBlobStore { bucket: String, key: String },

    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Text fields hold PEM; DER or other binary key material must be
    /// PEM encoded first
    #[error("{origin} is not UTF-8 text; binary (DER) key material must be PEM encoded")]
    NotUtf8 { origin: String },
}
