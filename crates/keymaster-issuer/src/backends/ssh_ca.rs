//! SSH certificate authority issuer
//!
//! Generates an ephemeral Ed25519 key pair per issuance and signs an
//! OpenSSH user certificate for it under the configured CA key.

use async_trait::async_trait;
use keymaster_core::config::{SshCaConfig, IDP_USER_PLACEHOLDER};
use keymaster_core::credential::SshCredential;
use keymaster_core::{BackendKind, Credential, CredentialBackend, CredentialValue, CredentialsConfig, Principal};
use rand::rngs::OsRng;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use std::sync::Arc;
use tracing::info;

use crate::error::BackendError;
use crate::issuer::{CredentialIssuer, IssueContext};
use crate::registry::IssuerFactory;

/// Certificates become valid this many seconds before issuance
const BACKDATE_SECONDS: u64 = 30;

/// Extensions granted to every user certificate
const USER_EXTENSIONS: &[&str] = &[
    "permit-X11-forwarding",
    "permit-agent-forwarding",
    "permit-port-forwarding",
    "permit-pty",
    "permit-user-rc",
];

/// Signs user certificates under one CA key
pub struct SshCaIssuer {
    name: String,
    ca_key: PrivateKey,
    principals: Vec<String>,
}

impl SshCaIssuer {
    /// Create an issuer from a loaded config
    ///
    /// `ca_key` must already be dereferenced to an OpenSSH private key. With
    /// no configured principals the certificate names the requester only.
    pub fn new(name: impl Into<String>, config: &SshCaConfig) -> Result<Self, BackendError> {
        let name = name.into();
        let ca_key = PrivateKey::from_openssh(config.ca_key.trim()).map_err(|e| {
            BackendError::InvalidConfig(format!("backend '{}' has an unreadable CA key: {}", name, e))
        })?;
        if ca_key.is_encrypted() {
            return Err(BackendError::InvalidConfig(format!(
                "backend '{}' has an encrypted CA key",
                name
            )));
        }

        let principals = if config.principals.is_empty() {
            vec![IDP_USER_PLACEHOLDER.to_string()]
        } else {
            config.principals.clone()
        };

        Ok(Self {
            name,
            ca_key,
            principals,
        })
    }

    /// Configured principals with the placeholder replaced by `username`
    fn principals_for(&self, username: &str) -> Vec<String> {
        self.principals
            .iter()
            .map(|p| p.replace(IDP_USER_PLACEHOLDER, username))
            .collect()
    }
}

#[async_trait]
impl CredentialIssuer for SshCaIssuer {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::SshCa
    }

    async fn issue_for(
        &self,
        principal: &Principal,
        context: &IssueContext,
    ) -> Result<Vec<Credential>, BackendError> {
        let mut rng = OsRng;
        let user_key = PrivateKey::random(&mut rng, Algorithm::Ed25519)?;

        let issued_at = u64::try_from(context.issued_at.timestamp()).unwrap_or(0);
        let expires_at = context.expires_at();
        let valid_before = u64::try_from(expires_at.timestamp()).unwrap_or(u64::MAX);
        let valid_after = issued_at.saturating_sub(BACKDATE_SECONDS);

        let principals = self.principals_for(&principal.username);

        let mut builder = Builder::new_with_random_nonce(
            &mut rng,
            user_key.public_key().key_data().clone(),
            valid_after,
            valid_before,
        )?;
        builder
            .serial(rand::random::<u64>())?
            .key_id(format!("keymaster:{}:{}", context.role, principal.username))?
            .cert_type(CertType::User)?;
        for p in &principals {
            builder.valid_principal(p)?;
        }
        for extension in USER_EXTENSIONS {
            builder.extension(*extension, "")?;
        }
        let certificate = builder.sign(&self.ca_key)?;

        info!(
            backend = %self.name,
            username = %principal.username,
            principals = ?principals,
            valid_before,
            "Signed SSH user certificate"
        );

        let value = CredentialValue::Ssh(SshCredential {
            principals,
            private_key: user_key.to_openssh(LineEnding::LF)?.to_string(),
            certificate: certificate.to_openssh()?,
        });

        Ok(vec![Credential::new(&self.name, expires_at, value)])
    }
}

/// Builds [`SshCaIssuer`]s
pub struct SshCaFactory;

impl SshCaFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SshCaFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl IssuerFactory for SshCaFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::SshCa
    }

    fn build(&self, config: &CredentialsConfig) -> Result<Arc<dyn CredentialIssuer>, BackendError> {
        match &config.backend {
            CredentialBackend::SshCa(params) => Ok(Arc::new(SshCaIssuer::new(&config.name, params)?)),
            other => Err(BackendError::InvalidConfig(format!(
                "backend '{}' is {}, not ssh_ca",
                config.name,
                other.kind()
            ))),
        }
    }

    fn description(&self) -> &str {
        "ssh certificate authority"
    }
}
