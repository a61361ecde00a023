//! # Keymaster Core
//!
//! Configuration model, credential types and wire contracts shared by the
//! Keymaster issuer and client.
//!
//! ## Key Concepts
//!
//! - **Role**: what a requester applies for; an ordered list of credential
//!   backends plus the workflow policy gating them
//! - **Credential backend**: a closed set of issuing mechanisms (role
//!   assumption, SSH CA, cluster CA, ...)
//! - **Workflow policy**: identification/approval requirements; a policy with
//!   neither needs no approval session
//! - **Resource reference**: `file://`, `data://`, `s3://` or literal values
//!   for certificates and keys, dereferenced once per config load

pub mod api;
pub mod config;
pub mod credential;
pub mod error;
pub mod resource;

pub use config::{
    BackendKind, Config, CredentialBackend, CredentialsConfig, IdpConfig, IdpProvider, RoleConfig,
    WorkflowPolicyConfig,
};
pub use credential::{Credential, CredentialValue, IamCredential, Principal};
pub use error::{ConfigError, ResourceError, Result};
pub use resource::{BlobStore, ResourceLoader, ResourceRef};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
