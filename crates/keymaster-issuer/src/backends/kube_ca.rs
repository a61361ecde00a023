//! Cluster certificate authority issuer
//!
//! Signs an X.509 client certificate for a fresh key pair: the subject CN is
//! the requester's username and the organization is the configured group,
//! which is how the cluster API server maps certificates to users and groups.

use async_trait::async_trait;
use keymaster_core::config::KubernetesCaConfig;
use keymaster_core::credential::KubernetesCredential;
use keymaster_core::{BackendKind, Credential, CredentialBackend, CredentialValue, CredentialsConfig, Principal};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::BackendError;
use crate::issuer::{CredentialIssuer, IssueContext};
use crate::registry::IssuerFactory;

/// Certificates become valid this many seconds before issuance
const BACKDATE_SECONDS: i64 = 30;

/// Subject CN of a CA certificate derived from a bare key (kubeadm's default)
const DERIVED_CA_COMMON_NAME: &str = "kubernetes";

/// Signs client certificates under one cluster CA
pub struct KubernetesCaIssuer {
    name: String,
    ca_cert_pem: String,
    ca_cert: Certificate,
    ca_key: KeyPair,
    groups: Vec<String>,
}

impl KubernetesCaIssuer {
    /// Create an issuer from a loaded config
    ///
    /// `ca_key` and `ca_cert` must already be dereferenced to PEM. With no
    /// `ca_cert`, a self-signed CA certificate is derived from the key. The
    /// subject encodes one value per attribute type, so at most one group
    /// can be configured.
    pub fn new(name: impl Into<String>, config: &KubernetesCaConfig) -> Result<Self, BackendError> {
        let name = name.into();
        let invalid = |what: &str, e: rcgen::Error| {
            BackendError::InvalidConfig(format!("backend '{}' has an unreadable {}: {}", name, what, e))
        };

        if config.groups.len() > 1 {
            return Err(BackendError::InvalidConfig(format!(
                "backend '{}' lists {} groups; at most one is supported",
                name,
                config.groups.len()
            )));
        }

        let ca_key = KeyPair::from_pem(&config.ca_key).map_err(|e| invalid("CA key", e))?;
        let derive = config.ca_cert.trim().is_empty();
        let ca_params = if derive {
            warn!(backend = %name, "No CA certificate configured; deriving one from the CA key");
            derived_ca_params()
        } else {
            CertificateParams::from_ca_cert_pem(&config.ca_cert).map_err(|e| invalid("CA certificate", e))?
        };
        let ca_cert = ca_params.self_signed(&ca_key).map_err(|e| invalid("CA key pair", e))?;
        let ca_cert_pem = if derive { ca_cert.pem() } else { config.ca_cert.clone() };

        Ok(Self {
            ca_cert_pem,
            ca_cert,
            ca_key,
            groups: config.groups.clone(),
            name,
        })
    }

    fn client_params(&self, username: &str, context: &IssueContext) -> Result<CertificateParams, BackendError> {
        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, username);
        for group in &self.groups {
            subject.push(DnType::OrganizationName, group.as_str());
        }

        let timestamp = |seconds: i64| {
            OffsetDateTime::from_unix_timestamp(seconds)
                .map_err(|e| BackendError::Certificate(format!("validity out of range: {}", e)))
        };

        let mut params = CertificateParams::default();
        params.distinguished_name = subject;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.not_before = timestamp(context.issued_at.timestamp() - BACKDATE_SECONDS)?;
        params.not_after = timestamp(context.expires_at().timestamp())?;
        Ok(params)
    }
}

fn derived_ca_params() -> CertificateParams {
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, DERIVED_CA_COMMON_NAME);

    let mut params = CertificateParams::default();
    params.distinguished_name = subject;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::CrlSign,
    ];
    params
}

#[async_trait]
impl CredentialIssuer for KubernetesCaIssuer {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    async fn issue_for(
        &self,
        principal: &Principal,
        context: &IssueContext,
    ) -> Result<Vec<Credential>, BackendError> {
        let key = KeyPair::generate()?;
        let params = self.client_params(&principal.username, context)?;
        let certificate = params.signed_by(&key, &self.ca_cert, &self.ca_key)?;

        info!(
            backend = %self.name,
            username = %principal.username,
            groups = ?self.groups,
            "Signed cluster client certificate"
        );

        let value = CredentialValue::Kubernetes(KubernetesCredential {
            username: principal.username.clone(),
            groups: self.groups.clone(),
            private_key: key.serialize_pem(),
            certificate: certificate.pem(),
            ca_certificate: self.ca_cert_pem.clone(),
        });

        Ok(vec![Credential::new(&self.name, context.expires_at(), value)])
    }
}

/// Builds [`KubernetesCaIssuer`]s
pub struct KubernetesCaFactory;

impl KubernetesCaFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KubernetesCaFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl IssuerFactory for KubernetesCaFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    fn build(&self, config: &CredentialsConfig) -> Result<Arc<dyn CredentialIssuer>, BackendError> {
        match &config.backend {
            CredentialBackend::Kubernetes(params) => Ok(Arc::new(KubernetesCaIssuer::new(&config.name, params)?)),
            other => Err(BackendError::InvalidConfig(format!(
                "backend '{}' is {}, not kubernetes",
                config.name,
                other.kind()
            ))),
        }
    }

    fn description(&self) -> &str {
        "cluster certificate authority"
    }
}
