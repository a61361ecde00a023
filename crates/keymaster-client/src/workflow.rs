//! Approval workflow sessions
//!
//! A session is opened against the approval engine bound to the issuer's
//! idp nonce, then polled on a fixed interval until an approver completes
//! or rejects it. Poll failures are transient and retried; a rejection or
//! an unknown state ends the loop.

use async_trait::async_trait;
use keymaster_core::WorkflowPolicyConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api_client::decode_response;
use crate::error::{ApiClientError, WorkflowError};

/// Interval between polls of a pending session
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// Wire types
// =============================================================================

/// The human the request is made for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub name: String,
    pub username: String,
    pub email: String,
}

/// Why the request is being made
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub description: String,
    pub details_uri: String,
}

/// The environment access is requested for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub environment_name: String,
    pub environment_discovery_uri: String,
}

/// POST 1/create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub idp_nonce: String,
    pub requester: Requester,
    pub source: Source,
    pub target: Target,
    pub policy: WorkflowPolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub workflow_id: String,
    pub workflow_nonce: String,
    pub workflow_url: String,
}

/// POST 1/getAssertions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAssertionsRequest {
    pub workflow_id: String,
    pub workflow_nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAssertionsResponse {
    pub status: String,
    #[serde(default)]
    pub assertions: Vec<String>,
}

// =============================================================================
// Session state
// =============================================================================

/// Lifecycle state reported by the approval engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Created,
    Completed,
    Rejected,
    Unexpected(String),
}

impl WorkflowState {
    pub fn from_status(status: &str) -> Self {
        match status {
            "CREATED" => WorkflowState::Created,
            "COMPLETED" => WorkflowState::Completed,
            "REJECTED" => WorkflowState::Rejected,
            other => WorkflowState::Unexpected(other.to_string()),
        }
    }
}

/// An open session on the approval engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSession {
    pub workflow_id: String,
    pub workflow_nonce: String,
    /// Where approvers go to act on the request
    pub workflow_url: String,
    /// The issuer nonce this session is bound to
    pub idp_nonce: String,
}

/// Result of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub state: WorkflowState,
    pub assertions: Vec<String>,
}

/// Everything about a request except the policy it is checked against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub idp_nonce: String,
    pub requester: Requester,
    pub source: Source,
    pub target: Target,
}

// =============================================================================
// Approval engine
// =============================================================================

/// Trait for approval engine backends
#[async_trait]
pub trait ApprovalEngine: Send + Sync {
    async fn create(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse, ApiClientError>;

    async fn get_assertions(&self, request: &GetAssertionsRequest) -> Result<GetAssertionsResponse, ApiClientError>;
}

/// Approval engine over HTTP, relative to the config's `workflow.base_url`
pub struct HttpApprovalEngine {
    base_url: String,
    client: reqwest::Client,
}

impl HttpApprovalEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ApprovalEngine for HttpApprovalEngine {
    async fn create(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse, ApiClientError> {
        let response = self.client.post(self.url("1/create")).json(request).send().await?;
        decode_response(response).await
    }

    async fn get_assertions(&self, request: &GetAssertionsRequest) -> Result<GetAssertionsResponse, ApiClientError> {
        let response = self.client.post(self.url("1/getAssertions")).json(request).send().await?;
        decode_response(response).await
    }
}

/// Trait for waiting between polls
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// Client
// =============================================================================

/// Drives approval sessions for one approval engine
pub struct WorkflowClient {
    engine: Arc<dyn ApprovalEngine>,
    sleeper: Arc<dyn Sleeper>,
    poll_interval: Duration,
}

impl WorkflowClient {
    pub fn new(engine: Arc<dyn ApprovalEngine>) -> Self {
        Self {
            engine,
            sleeper: Arc::new(TokioSleeper),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Open a session bound to the request's idp nonce
    pub async fn create(&self, request: &CreateSessionRequest) -> Result<WorkflowSession, WorkflowError> {
        let created = self
            .engine
            .create(request)
            .await
            .map_err(WorkflowError::SessionCreate)?;

        info!(workflow_id = %created.workflow_id, policy = %request.policy.name, "Created workflow session");

        Ok(WorkflowSession {
            workflow_id: created.workflow_id,
            workflow_nonce: created.workflow_nonce,
            workflow_url: created.workflow_url,
            idp_nonce: request.idp_nonce.clone(),
        })
    }

    /// Poll a session once
    pub async fn poll(&self, session: &WorkflowSession) -> Result<PollOutcome, WorkflowError> {
        let request = GetAssertionsRequest {
            workflow_id: session.workflow_id.clone(),
            workflow_nonce: session.workflow_nonce.clone(),
        };
        let response = self
            .engine
            .get_assertions(&request)
            .await
            .map_err(WorkflowError::Transport)?;

        Ok(PollOutcome {
            state: WorkflowState::from_status(&response.status),
            assertions: response.assertions,
        })
    }

    /// Poll until the session completes, sleeping the fixed interval
    /// between attempts
    pub async fn await_assertions(&self, session: &WorkflowSession) -> Result<Vec<String>, WorkflowError> {
        loop {
            match self.poll(session).await {
                Ok(outcome) => {
                    debug!(workflow_id = %session.workflow_id, state = ?outcome.state, "Workflow state");
                    match outcome.state {
                        WorkflowState::Created => {}
                        WorkflowState::Completed => {
                            info!(
                                workflow_id = %session.workflow_id,
                                assertions = outcome.assertions.len(),
                                "Workflow completed"
                            );
                            return Ok(outcome.assertions);
                        }
                        WorkflowState::Rejected => return Err(WorkflowError::Rejected),
                        WorkflowState::Unexpected(status) => return Err(WorkflowError::UnexpectedState(status)),
                    }
                }
                Err(WorkflowError::Transport(err)) => {
                    warn!(workflow_id = %session.workflow_id, error = %err, "Workflow poll failed; retrying");
                }
                Err(other) => return Err(other),
            }
            self.sleeper.sleep(self.poll_interval).await;
        }
    }

    /// Obtain the assertions a policy requires
    ///
    /// A policy with no identification or approval requirements needs no
    /// session; the request proceeds with no assertions.
    pub async fn obtain_assertions(
        &self,
        request: &WorkflowRequest,
        policy: &WorkflowPolicyConfig,
    ) -> Result<Vec<String>, WorkflowError> {
        if !policy.requires_workflow() {
            info!(
                policy = %policy.name,
                username = %request.requester.username,
                workflow_skipped = true,
                "Policy requires no workflow"
            );
            return Ok(Vec::new());
        }

        let session = self
            .create(&CreateSessionRequest {
                idp_nonce: request.idp_nonce.clone(),
                requester: request.requester.clone(),
                source: request.source.clone(),
                target: request.target.clone(),
                policy: policy.clone(),
            })
            .await?;

        info!(approval_url = %session.workflow_url, "APPROVAL URL: {}", session.workflow_url);

        self.await_assertions(&session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted poll results and records create calls
    #[derive(Default)]
    struct ScriptedEngine {
        polls: Mutex<VecDeque<Result<GetAssertionsResponse, ApiClientError>>>,
        created: Mutex<Vec<CreateSessionRequest>>,
        poll_count: Mutex<usize>,
    }

    impl ScriptedEngine {
        fn with_polls(polls: Vec<Result<GetAssertionsResponse, ApiClientError>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ApprovalEngine for ScriptedEngine {
        async fn create(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse, ApiClientError> {
            self.created.lock().unwrap().push(request.clone());
            Ok(CreateSessionResponse {
                workflow_id: "wf-1".into(),
                workflow_nonce: "wf-nonce".into(),
                workflow_url: "https://workflow.example.com/approve/wf-1".into(),
            })
        }

        async fn get_assertions(&self, request: &GetAssertionsRequest) -> Result<GetAssertionsResponse, ApiClientError> {
            assert_eq!(request.workflow_id, "wf-1");
            assert_eq!(request.workflow_nonce, "wf-nonce");
            *self.poll_count.lock().unwrap() += 1;
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .expect("poll script exhausted")
        }
    }

    #[derive(Default)]
    struct CountingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for CountingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn status(status: &str, assertions: &[&str]) -> Result<GetAssertionsResponse, ApiClientError> {
        Ok(GetAssertionsResponse {
            status: status.into(),
            assertions: assertions.iter().map(|a| a.to_string()).collect(),
        })
    }

    fn transport_failure() -> Result<GetAssertionsResponse, ApiClientError> {
        Err(ApiClientError::Status {
            status: 503,
            code: String::new(),
            message: "Service Unavailable".into(),
        })
    }

    fn session() -> WorkflowSession {
        WorkflowSession {
            workflow_id: "wf-1".into(),
            workflow_nonce: "wf-nonce".into(),
            workflow_url: "https://workflow.example.com/approve/wf-1".into(),
            idp_nonce: "idp-nonce".into(),
        }
    }

    fn client(engine: Arc<ScriptedEngine>, sleeper: Arc<CountingSleeper>) -> WorkflowClient {
        WorkflowClient::new(engine).with_sleeper(sleeper)
    }

    fn policy(identify: bool) -> WorkflowPolicyConfig {
        let mut policy = WorkflowPolicyConfig {
            name: "developer".into(),
            idp_name: "approvals".into(),
            ..Default::default()
        };
        if identify {
            policy.identify_roles.insert("adfs_role_developer".into(), 1);
        }
        policy
    }

    #[tokio::test]
    async fn test_created_twice_then_completed_sleeps_twice() {
        let engine = Arc::new(ScriptedEngine::with_polls(vec![
            status("CREATED", &[]),
            status("CREATED", &[]),
            status("COMPLETED", &["assertion-1", "assertion-2"]),
        ]));
        let sleeper = Arc::new(CountingSleeper::default());

        let assertions = client(engine.clone(), sleeper.clone())
            .await_assertions(&session())
            .await
            .unwrap();

        assert_eq!(assertions, vec!["assertion-1", "assertion-2"]);
        assert_eq!(*sleeper.sleeps.lock().unwrap(), vec![DEFAULT_POLL_INTERVAL; 2]);
        assert_eq!(*engine.poll_count.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rejected_halts_immediately() {
        let engine = Arc::new(ScriptedEngine::with_polls(vec![status("REJECTED", &[])]));
        let sleeper = Arc::new(CountingSleeper::default());

        let err = client(engine.clone(), sleeper.clone())
            .await_assertions(&session())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Rejected));
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
        assert_eq!(*engine.poll_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let engine = Arc::new(ScriptedEngine::with_polls(vec![
            transport_failure(),
            status("COMPLETED", &["assertion-1"]),
        ]));
        let sleeper = Arc::new(CountingSleeper::default());

        let assertions = client(engine, sleeper.clone())
            .await_assertions(&session())
            .await
            .unwrap();

        assert_eq!(assertions, vec!["assertion-1"]);
        assert_eq!(sleeper.sleeps.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_state_not_retried() {
        let engine = Arc::new(ScriptedEngine::with_polls(vec![status("EXPIRED", &[])]));
        let sleeper = Arc::new(CountingSleeper::default());

        let err = client(engine, sleeper.clone())
            .await_assertions(&session())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::UnexpectedState(ref s) if s == "EXPIRED"));
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_poll_interval() {
        let engine = Arc::new(ScriptedEngine::with_polls(vec![
            status("CREATED", &[]),
            status("COMPLETED", &[]),
        ]));
        let sleeper = Arc::new(CountingSleeper::default());

        client(engine, sleeper.clone())
            .with_poll_interval(Duration::from_millis(10))
            .await_assertions(&session())
            .await
            .unwrap();

        assert_eq!(*sleeper.sleeps.lock().unwrap(), vec![Duration::from_millis(10)]);
    }

    #[tokio::test]
    async fn test_empty_policy_skips_session() {
        let engine = Arc::new(ScriptedEngine::default());
        let sleeper = Arc::new(CountingSleeper::default());

        let request = WorkflowRequest {
            idp_nonce: "idp-nonce".into(),
            ..Default::default()
        };
        let assertions = client(engine.clone(), sleeper)
            .obtain_assertions(&request, &policy(false))
            .await
            .unwrap();

        assert!(assertions.is_empty());
        assert!(engine.created.lock().unwrap().is_empty());
        assert_eq!(*engine.poll_count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_session_bound_to_idp_nonce() {
        let engine = Arc::new(ScriptedEngine::with_polls(vec![status("COMPLETED", &["a"])]));
        let sleeper = Arc::new(CountingSleeper::default());

        let request = WorkflowRequest {
            idp_nonce: "idp-nonce-42".into(),
            requester: Requester {
                name: "Bob Smith".into(),
                username: "smithb12".into(),
                email: "bob.smith@awesome.com".into(),
            },
            ..Default::default()
        };
        client(engine.clone(), sleeper)
            .obtain_assertions(&request, &policy(true))
            .await
            .unwrap();

        let created = engine.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].idp_nonce, "idp-nonce-42");
        assert_eq!(created[0].requester.username, "smithb12");
        assert_eq!(created[0].policy.name, "developer");
    }

    #[test]
    fn test_state_from_status() {
        assert_eq!(WorkflowState::from_status("CREATED"), WorkflowState::Created);
        assert_eq!(WorkflowState::from_status("COMPLETED"), WorkflowState::Completed);
        assert_eq!(WorkflowState::from_status("REJECTED"), WorkflowState::Rejected);
        assert_eq!(
            WorkflowState::from_status("completed"),
            WorkflowState::Unexpected("completed".into())
        );
    }
}
