//! Error types for the Keymaster client

use keymaster_core::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors talking to the issuer or the approval engine over HTTP
#[derive(Error, Debug)]
pub enum ApiClientError {
    /// Connection, TLS or timeout failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("{status} {code}: {message}")]
    Status { status: u16, code: String, message: String },

    /// The response body was not what the contract promises
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors from driving an approval workflow
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// The session could not be opened; not retried
    #[error("Failed to create workflow session: {0}")]
    SessionCreate(#[source] ApiClientError),

    /// A single poll failed; the polling loop retries these
    #[error("Workflow poll failed: {0}")]
    Transport(#[source] ApiClientError),

    /// An approver denied the request
    #[error("Your change request was REJECTED by a workflow approver")]
    Rejected,

    #[error("Unexpected workflow state: {0}")]
    UnexpectedState(String),
}

/// Errors persisting credentials to the local profile store
#[derive(Error, Debug)]
pub enum WriteError {
    /// The existing store cannot be parsed and is left untouched
    #[error("Credentials file is malformed at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Failed to access credentials file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A failed CI run, named by the stage that failed
#[derive(Error, Debug)]
pub enum CiError {
    #[error("discovery failed: {0}")]
    Discovery(#[source] ApiClientError),

    #[error("config fetch failed: {0}")]
    ConfigFetch(#[source] ApiClientError),

    #[error("config invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("workflow start failed: {0}")]
    WorkflowStart(#[source] ApiClientError),

    #[error("workflow failed: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("issuance failed: {0}")]
    Issuance(#[source] ApiClientError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] WriteError),
}

impl CiError {
    /// The stage of the run that failed
    pub fn stage(&self) -> &'static str {
        match self {
            CiError::Discovery(_) => "discovery",
            CiError::ConfigFetch(_) | CiError::Config(_) => "config",
            CiError::WorkflowStart(_) | CiError::Workflow(_) => "workflow",
            CiError::Issuance(_) => "issuance",
            CiError::Persistence(_) => "persistence",
        }
    }
}
