//! # Keymaster Issuer
//!
//! The credential issuance engine: turns a role's ordered credential list
//! into concrete, heterogeneous secrets for an authenticated principal.
//!
//! ## Architecture
//!
//! The engine keeps a registry of issuer factories, one per backend kind:
//!
//! - **iam_assume_role**: assumes a cloud role through an [`StsClient`](backends::StsClient)
//! - **ssh_ca**: signs an OpenSSH user certificate for an ephemeral key
//! - **kubernetes**: signs an X.509 client certificate under the cluster CA
//! - **Mock**: for testing purposes
//!
//! Kinds with no registered factory are skipped when a role is built.
//!
//! ## Usage
//!
//! ```ignore
//! use keymaster_issuer::{Issuer, IssuerRegistry};
//!
//! let registry = IssuerRegistry::with_standard_backends();
//! let role = config.resolve_role("developer")?;
//! let issuer = Issuer::from_config(role, &config, &registry, None)?;
//!
//! let credentials = issuer.issue_for(&principal).await?;
//! ```

pub mod backends;
pub mod error;
pub mod issuer;
pub mod registry;
pub mod wrap;

pub use error::{BackendError, IssuanceError, Result, WrapError};
pub use issuer::{CredentialIssuer, IssueContext, Issuer};
pub use registry::{IssuerFactory, IssuerRegistry, IssuerRegistryBuilder};
pub use wrap::{wrap_credential, KeyWrapper};
