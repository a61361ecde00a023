//! Issuance fan-out - turns a role's credential list into credentials

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keymaster_core::{BackendKind, Config, Credential, Principal, RoleConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{BackendError, IssuanceError, Result};
use crate::registry::IssuerRegistry;
use crate::wrap::{wrap_credential, KeyWrapper};

/// Trait for credential issuers
///
/// Each issuer is bound to one configured backend and produces the
/// credentials of that backend's kind for a principal.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Name of the configured backend this issuer serves
    fn backend_name(&self) -> &str;

    /// Kind of credential backend
    fn kind(&self) -> BackendKind;

    /// Issue credentials for a principal
    ///
    /// # Arguments
    /// * `principal` - The authenticated requester
    /// * `context` - Role-derived issuance parameters (validity window)
    async fn issue_for(
        &self,
        principal: &Principal,
        context: &IssueContext,
    ) -> std::result::Result<Vec<Credential>, BackendError>;
}

/// Parameters shared by every issuer in one issuance run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueContext {
    /// Role the credentials are issued for
    pub role: String,

    /// Requested credential lifetime
    pub validity: Duration,

    /// Start of the validity window
    pub issued_at: DateTime<Utc>,
}

impl IssueContext {
    pub fn new(role: impl Into<String>, validity: Duration) -> Self {
        Self {
            role: role.into(),
            validity,
            issued_at: Utc::now(),
        }
    }

    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    /// End of the validity window
    pub fn expires_at(&self) -> DateTime<Utc> {
        let validity = chrono::Duration::from_std(self.validity).unwrap_or(chrono::Duration::MAX);
        self.issued_at
            .checked_add_signed(validity)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// The ordered set of issuers for one role
pub struct Issuer {
    role: String,
    validity: Duration,
    issuers: Vec<Arc<dyn CredentialIssuer>>,
    wrap_key: Option<String>,
    wrapper: Option<Arc<dyn KeyWrapper>>,
}

impl Issuer {
    /// Build the issuers for a role from a config snapshot
    ///
    /// Backends are visited in the role's declared order. A name that does
    /// not resolve is a configuration error; a kind with no registered
    /// factory is skipped with a warning.
    pub fn from_config(
        role: &RoleConfig,
        config: &Config,
        registry: &IssuerRegistry,
        wrapper: Option<Arc<dyn KeyWrapper>>,
    ) -> Result<Self> {
        let mut issuers = Vec::with_capacity(role.credentials.len());

        for name in &role.credentials {
            let backend = config.resolve_credential_backend(name)?;
            let kind = backend.backend.kind();

            let Some(factory) = registry.get_factory(kind) else {
                warn!(
                    role = %role.name,
                    backend = %name,
                    backend_kind = %kind,
                    "No issuer registered for backend kind, skipping"
                );
                continue;
            };

            let issuer = factory.build(backend).map_err(|source| IssuanceError::Build {
                backend: name.clone(),
                source,
            })?;
            issuers.push(issuer);
        }

        Ok(Self {
            role: role.name.clone(),
            validity: role.validity(),
            issuers,
            wrap_key: role.wrap_key().map(str::to_string),
            wrapper,
        })
    }

    /// Backend names that will issue, in order
    pub fn backend_names(&self) -> Vec<&str> {
        self.issuers.iter().map(|i| i.backend_name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }

    /// Issue every backend's credentials for a principal
    ///
    /// Issuers run sequentially in role order. The first failure aborts the
    /// remaining issuers and no credentials are returned.
    pub async fn issue_for(&self, principal: &Principal) -> Result<Vec<Credential>> {
        let wrapping = match (&self.wrap_key, &self.wrapper) {
            (Some(key_id), Some(wrapper)) => Some((key_id.as_str(), wrapper)),
            (Some(key_id), None) => {
                return Err(IssuanceError::WrapperUnavailable {
                    key_id: key_id.clone(),
                })
            }
            (None, _) => None,
        };

        let context = IssueContext::new(&self.role, self.validity);
        let mut all = Vec::new();

        for (index, issuer) in self.issuers.iter().enumerate() {
            let position = index + 1;
            let issued = issuer
                .issue_for(principal, &context)
                .await
                .map_err(|source| {
                    warn!(
                        role = %self.role,
                        username = %principal.username,
                        position,
                        backend = issuer.backend_name(),
                        error = %source,
                        "Credential issuance failed"
                    );
                    IssuanceError::Backend {
                        position,
                        backend: issuer.backend_name().to_string(),
                        source,
                    }
                })?;
            all.extend(issued);
        }

        if let Some((key_id, wrapper)) = wrapping {
            let mut wrapped = Vec::with_capacity(all.len());
            for credential in all {
                let backend = credential.name.clone();
                let credential = wrap_credential(wrapper.as_ref(), key_id, credential)
                    .await
                    .map_err(|source| IssuanceError::Wrap { backend, source })?;
                wrapped.push(credential);
            }
            all = wrapped;
        }

        info!(
            role = %self.role,
            username = %principal.username,
            credentials = all.len(),
            wrapped = wrapping.is_some(),
            "Issued credentials"
        );

        Ok(all)
    }
}
