//! Cloud role assumption issuer
//!
//! Calls the token service through [`StsClient`] and yields one `iam`
//! credential whose profile name is the backend name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keymaster_core::config::AssumeRoleConfig;
use keymaster_core::{BackendKind, Credential, CredentialBackend, CredentialValue, CredentialsConfig, IamCredential, Principal};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::BackendError;
use crate::issuer::{CredentialIssuer, IssueContext};
use crate::registry::IssuerFactory;

/// Shortest session the token service grants
const MIN_SESSION_SECONDS: u64 = 900;

/// Longest session the token service grants
const MAX_SESSION_SECONDS: u64 = 43_200;

/// Session names are limited to 64 characters of `[\w+=,.@-]`
const MAX_SESSION_NAME_LEN: usize = 64;

/// A single role assumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub session_name: String,
    pub duration: Duration,
}

/// Temporary credentials returned by the token service
#[derive(Clone, PartialEq, Eq)]
pub struct StsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

/// Trait for cloud token services
#[async_trait]
pub trait StsClient: Send + Sync {
    /// Assume a role and return its temporary credentials
    async fn assume_role(&self, request: AssumeRoleRequest) -> Result<StsCredentials, BackendError>;

    /// Account the issuer runs in; bare role names are expanded against it
    fn account_id(&self) -> Option<&str> {
        None
    }

    /// Get a description of this client (for logging)
    fn description(&self) -> &str {
        "sts client"
    }
}

/// Issues credentials by assuming a configured role
pub struct AssumeRoleIssuer {
    name: String,
    role_arn: String,
    sts: Arc<dyn StsClient>,
}

impl AssumeRoleIssuer {
    /// Create an issuer for one backend
    ///
    /// A bare role name (anything not starting with `arn:`) is expanded to
    /// `arn:aws:iam::<account>:role/<name>` using the client's account.
    pub fn new(name: impl Into<String>, config: &AssumeRoleConfig, sts: Arc<dyn StsClient>) -> Result<Self, BackendError> {
        let name = name.into();
        let target = config.target_role.trim();
        if target.is_empty() {
            return Err(BackendError::InvalidConfig(format!("backend '{}' has no target_role", name)));
        }

        let role_arn = if target.starts_with("arn:") {
            target.to_string()
        } else {
            let account = sts.account_id().ok_or_else(|| {
                BackendError::InvalidConfig(format!(
                    "backend '{}' names role '{}' without an account and the issuer account is unknown",
                    name, target
                ))
            })?;
            format!("arn:aws:iam::{}:role/{}", account, target)
        };

        Ok(Self { name, role_arn, sts })
    }

    /// Fully qualified role this issuer assumes
    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }
}

#[async_trait]
impl CredentialIssuer for AssumeRoleIssuer {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::IamAssumeRole
    }

    async fn issue_for(
        &self,
        principal: &Principal,
        context: &IssueContext,
    ) -> Result<Vec<Credential>, BackendError> {
        let seconds = context.validity.as_secs().clamp(MIN_SESSION_SECONDS, MAX_SESSION_SECONDS);
        let request = AssumeRoleRequest {
            role_arn: self.role_arn.clone(),
            session_name: session_name(&principal.username),
            duration: Duration::from_secs(seconds),
        };

        debug!(
            backend = %self.name,
            role_arn = %request.role_arn,
            session_name = %request.session_name,
            duration_seconds = seconds,
            sts = self.sts.description(),
            "Assuming role"
        );

        let sts_creds = self.sts.assume_role(request.clone()).await?;
        let expires_at = sts_creds.expiration.unwrap_or_else(|| context.expires_at());

        info!(
            backend = %self.name,
            role_arn = %request.role_arn,
            username = %principal.username,
            expires_at = %expires_at,
            "Assumed role"
        );

        let value = CredentialValue::Iam(IamCredential {
            profile_name: self.name.clone(),
            role_arn: request.role_arn,
            role_session_name: request.session_name,
            access_key_id: sts_creds.access_key_id,
            secret_access_key: sts_creds.secret_access_key,
            session_token: sts_creds.session_token,
        });

        Ok(vec![Credential::new(&self.name, expires_at, value)])
    }
}

/// Derive a token-service session name from a username
fn session_name(username: &str) -> String {
    let mut name: String = username
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect();
    if name.len() < 2 {
        name = format!("km-{}", name);
    }
    name.truncate(MAX_SESSION_NAME_LEN);
    name
}

/// Builds [`AssumeRoleIssuer`]s sharing one token service client
pub struct AssumeRoleFactory {
    sts: Arc<dyn StsClient>,
}

impl AssumeRoleFactory {
    pub fn new(sts: Arc<dyn StsClient>) -> Self {
        Self { sts }
    }
}

impl IssuerFactory for AssumeRoleFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::IamAssumeRole
    }

    fn build(&self, config: &CredentialsConfig) -> Result<Arc<dyn CredentialIssuer>, BackendError> {
        match &config.backend {
            CredentialBackend::IamAssumeRole(params) => {
                Ok(Arc::new(AssumeRoleIssuer::new(&config.name, params, self.sts.clone())?))
            }
            other => Err(BackendError::InvalidConfig(format!(
                "backend '{}' is {}, not iam_assume_role",
                config.name,
                other.kind()
            ))),
        }
    }

    fn description(&self) -> &str {
        "iam role assumption"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSts {
        account: Option<String>,
        requests: Mutex<Vec<AssumeRoleRequest>>,
    }

    #[async_trait]
    impl StsClient for RecordingSts {
        async fn assume_role(&self, request: AssumeRoleRequest) -> Result<StsCredentials, BackendError> {
            if request.role_arn.ends_with("/Denied") {
                return Err(BackendError::Sts("AccessDenied".into()));
            }
            self.requests.lock().unwrap().push(request);
            Ok(StsCredentials {
                access_key_id: "ASIAEXAMPLE".into(),
                secret_access_key: "secret".into(),
                session_token: "token".into(),
                expiration: DateTime::from_timestamp(1_900_000_000, 0),
            })
        }

        fn account_id(&self) -> Option<&str> {
            self.account.as_deref()
        }
    }

    fn config(target_role: &str) -> AssumeRoleConfig {
        AssumeRoleConfig {
            target_role: target_role.into(),
        }
    }

    #[test]
    fn test_bare_role_expanded_with_account() {
        let sts = Arc::new(RecordingSts {
            account: Some("123456789012".into()),
            ..Default::default()
        });
        let issuer = AssumeRoleIssuer::new("aws-admin", &config("Administrator"), sts).unwrap();
        assert_eq!(issuer.role_arn(), "arn:aws:iam::123456789012:role/Administrator");
    }

    #[test]
    fn test_bare_role_without_account_rejected() {
        let sts = Arc::new(RecordingSts::default());
        let result = AssumeRoleIssuer::new("aws-admin", &config("Administrator"), sts);
        assert!(matches!(result, Err(BackendError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_issue_assumes_role() {
        let sts = Arc::new(RecordingSts::default());
        let issuer = AssumeRoleIssuer::new(
            "aws-ro",
            &config("arn:aws:iam::062921715666:role/ReadOnly"),
            sts.clone(),
        )
        .unwrap();

        let context = IssueContext::new("developer", Duration::from_secs(300));
        let creds = issuer
            .issue_for(&Principal::new("alice@example.com", "developer"), &context)
            .await
            .unwrap();

        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].name, "aws-ro");
        assert_eq!(creds[0].expiry, 1_900_000_000);
        let iam = creds[0].as_iam().unwrap();
        assert_eq!(iam.profile_name, "aws-ro");
        assert_eq!(iam.role_session_name, "alice@example.com");
        assert_eq!(iam.access_key_id, "ASIAEXAMPLE");

        let requests = sts.requests.lock().unwrap();
        assert_eq!(requests[0].role_arn, "arn:aws:iam::062921715666:role/ReadOnly");
        assert_eq!(requests[0].duration, Duration::from_secs(MIN_SESSION_SECONDS));
    }

    #[tokio::test]
    async fn test_sts_failure_propagates() {
        let sts = Arc::new(RecordingSts::default());
        let issuer = AssumeRoleIssuer::new("aws-denied", &config("arn:aws:iam::1:role/Denied"), sts).unwrap();
        let context = IssueContext::new("developer", Duration::from_secs(3600));

        let result = issuer.issue_for(&Principal::new("alice", "developer"), &context).await;
        assert!(matches!(result, Err(BackendError::Sts(_))));
    }

    #[test]
    fn test_session_name_sanitized() {
        assert_eq!(session_name("CORP\\alice smith"), "CORP-alice-smith");
        assert_eq!(session_name("a"), "km-a");
        assert_eq!(session_name(&"x".repeat(100)).len(), MAX_SESSION_NAME_LEN);
    }

    #[test]
    fn test_factory_rejects_other_kind() {
        let factory = AssumeRoleFactory::new(Arc::new(RecordingSts::default()));
        let config = CredentialsConfig {
            name: "ssh".into(),
            backend: CredentialBackend::SshCa(Default::default()),
        };
        assert!(factory.build(&config).is_err());
    }
}
