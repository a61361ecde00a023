//! # Keymaster Server
//!
//! The issuer service. It serves one config snapshot and turns approved
//! workflows into short-lived credentials.
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /v1/discovery` - API version and environment name
//! - `GET /v1/config` - Config snapshot with CA private keys and HMAC secrets removed
//! - `POST /v1/workflow/start` - Mint an issuing nonce and idp nonce
//! - `POST /v1/workflow/auth` - Redeem a workflow and issue credentials
//!
//! ## Cloud services
//!
//! With the `aws` feature, role assumption goes through STS, delivery
//! wrapping through KMS and `s3://` references through S3. Without it only
//! the certificate authority backends are registered.

#[cfg(feature = "aws")]
pub mod aws;
pub mod service;
pub mod settings;

use keymaster_issuer::backends::{AssumeRoleFactory, StsClient};
use keymaster_issuer::IssuerRegistry;
use std::sync::Arc;

pub use service::create_router;
pub use service::error::ApiError;
pub use service::handlers::AppState;
pub use service::nonces::{MemoryNonceStore, NonceStore};
pub use settings::{ServerSettings, SettingsError};

/// Registry with the certificate authority backends and, when a token
/// service is available, role assumption
pub fn standard_registry(sts: Option<Arc<dyn StsClient>>) -> IssuerRegistry {
    let mut registry = IssuerRegistry::with_standard_backends();
    if let Some(sts) = sts {
        registry.register_factory(AssumeRoleFactory::new(sts));
    }
    registry
}
