//! Issuer API request/response bodies
//!
//! Shared by the issuer service and the client so both sides agree on the
//! JSON contract.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::credential::Credential;

/// API version reported by discovery
pub const API_VERSION: &str = "v1";

/// GET /v1/discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub api_version: String,
    /// Environment name of the served config
    pub environment: String,
    /// Issuer software version
    pub version: String,
}

/// GET /v1/config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub version: String,
    /// Redacted snapshot (no CA private keys or HMAC shared secrets)
    pub config: Config,
}

/// POST /v1/workflow/start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStartResponse {
    /// Single-use nonce identifying this pending authentication
    pub issuing_nonce: String,
    /// Nonce the workflow session and its assertions must be bound to
    pub idp_nonce: String,
}

/// POST /v1/workflow/auth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAuthRequest {
    pub username: String,
    pub role: String,
    pub issuing_nonce: String,
    pub idp_nonce: String,
    #[serde(default)]
    pub assertions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAuthResponse {
    pub credentials: Vec<Credential>,
}

/// Error body returned by the issuer service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
