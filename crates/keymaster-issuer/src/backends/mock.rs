//! Mock Issuer
//!
//! For testing purposes - issues deterministic access-key credentials and
//! records every call so tests can assert on ordering.

use async_trait::async_trait;
use keymaster_core::{BackendKind, Credential, CredentialValue, CredentialsConfig, IamCredential, Principal};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::BackendError;
use crate::issuer::{CredentialIssuer, IssueContext};
use crate::registry::IssuerFactory;

/// Shared record of backend names in the order they issued
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Mock issuer for testing
///
/// Yields one `iam` credential:
/// - profile name: the backend name
/// - access key id: `MOCK<username>`
/// - expiry: end of the context's validity window
///
/// Fails with the configured message when built with [`MockIssuer::failing`].
pub struct MockIssuer {
    name: String,
    kind: BackendKind,
    failure: Option<String>,
    calls: CallLog,
}

impl MockIssuer {
    /// Create a new mock issuer
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            failure: None,
            calls: CallLog::default(),
        }
    }

    /// Make every issuance fail with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Record calls into a shared log
    pub fn with_call_log(mut self, calls: CallLog) -> Self {
        self.calls = calls;
        self
    }
}

#[async_trait]
impl CredentialIssuer for MockIssuer {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn issue_for(
        &self,
        principal: &Principal,
        context: &IssueContext,
    ) -> Result<Vec<Credential>, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(self.name.clone());
        }

        if let Some(message) = &self.failure {
            return Err(BackendError::Failed(message.clone()));
        }

        let value = CredentialValue::Iam(IamCredential {
            profile_name: self.name.clone(),
            role_arn: format!("arn:aws:iam::000000000000:role/{}", context.role),
            role_session_name: principal.username.clone(),
            access_key_id: format!("MOCK{}", principal.username),
            secret_access_key: format!("mock-secret-{}", self.name),
            session_token: format!("mock-token-{}", self.name),
        });

        Ok(vec![Credential::new(&self.name, context.expires_at(), value)])
    }
}

/// Builds [`MockIssuer`]s for one backend kind
pub struct MockFactory {
    kind: BackendKind,
    failures: HashMap<String, String>,
    calls: CallLog,
}

impl MockFactory {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            failures: HashMap::new(),
            calls: CallLog::default(),
        }
    }

    /// Issuers built for `backend` fail with `message`
    pub fn with_failure(mut self, backend: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(backend.into(), message.into());
        self
    }

    /// Issuers built by this factory record into `calls`
    pub fn with_call_log(mut self, calls: CallLog) -> Self {
        self.calls = calls;
        self
    }
}

impl IssuerFactory for MockFactory {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn build(&self, config: &CredentialsConfig) -> Result<Arc<dyn CredentialIssuer>, BackendError> {
        let mut issuer = MockIssuer::new(&config.name, self.kind).with_call_log(self.calls.clone());
        if let Some(message) = self.failures.get(&config.name) {
            issuer = issuer.failing(message.clone());
        }
        Ok(Arc::new(issuer))
    }

    fn description(&self) -> &str {
        "mock issuer factory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn context() -> IssueContext {
        IssueContext::new("developer", Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_mock_issues_for_principal() {
        let issuer = MockIssuer::new("aws-ro", BackendKind::IamAssumeRole);
        let context = context();
        let creds = issuer.issue_for(&Principal::new("alice", "developer"), &context).await.unwrap();

        assert_eq!(creds.len(), 1);
        let iam = creds[0].as_iam().unwrap();
        assert_eq!(iam.profile_name, "aws-ro");
        assert_eq!(iam.access_key_id, "MOCKalice");
        assert_eq!(creds[0].expiry, context.expires_at().timestamp());
    }

    #[tokio::test]
    async fn test_explicit_failure() {
        let issuer = MockIssuer::new("aws-ro", BackendKind::IamAssumeRole).failing("test error");
        let result = issuer.issue_for(&Principal::new("alice", "developer"), &context()).await;

        match result.unwrap_err() {
            BackendError::Failed(msg) => assert_eq!(msg, "test error"),
            other => panic!("Expected Failed error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_log_records_order() {
        let calls = CallLog::default();
        let a = MockIssuer::new("a", BackendKind::SshCa).with_call_log(calls.clone());
        let b = MockIssuer::new("b", BackendKind::SshCa).with_call_log(calls.clone());
        let principal = Principal::new("alice", "developer");

        b.issue_for(&principal, &context()).await.unwrap();
        a.issue_for(&principal, &context()).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["b", "a"]);
    }
}
