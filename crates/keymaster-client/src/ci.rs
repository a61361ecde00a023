//! Non-interactive authentication for CI pipelines
//!
//! One run walks the stages in order: discovery, config, workflow,
//! issuance, persistence. The first failure ends the run and is reported
//! with its stage.

use keymaster_core::api::WorkflowAuthRequest;
use keymaster_core::Credential;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api_client::IssuerApi;
use crate::error::CiError;
use crate::sink::save_iam_credentials;
use crate::workflow::{
    ApprovalEngine, HttpApprovalEngine, Requester, Sleeper, Source, Target, TokioSleeper, WorkflowClient,
    WorkflowRequest, DEFAULT_POLL_INTERVAL,
};

/// Everything a CI run needs, gathered up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiRequest {
    /// Issuer URL, recorded as the target's discovery URI
    pub issuer_url: String,
    pub role: String,
    pub username: String,
    /// Human name of the requester
    pub name: String,
    pub email: String,
    /// Purpose of the access request
    pub description: String,
    /// Link with further details (pull request, pipeline)
    pub details_url: String,
    /// Write the single iam credential under this profile name
    pub aws_profile_name: Option<String>,
    pub aws_credentials_file: PathBuf,
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct CiOutcome {
    pub environment: String,
    pub credentials: Vec<Credential>,
    /// Whether the credentials file was updated
    pub persisted: bool,
}

/// Runs the CI flow against one issuer
pub struct CiRunner {
    api: Arc<dyn IssuerApi>,
    engine: Option<Arc<dyn ApprovalEngine>>,
    sleeper: Arc<dyn Sleeper>,
    poll_interval: Duration,
}

impl CiRunner {
    pub fn new(api: Arc<dyn IssuerApi>) -> Self {
        Self {
            api,
            engine: None,
            sleeper: Arc::new(TokioSleeper),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Use this approval engine instead of the config's `workflow.base_url`
    pub fn with_approval_engine(mut self, engine: Arc<dyn ApprovalEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn run(&self, request: &CiRequest) -> Result<CiOutcome, CiError> {
        let discovered = self.api.discovery().await.map_err(CiError::Discovery)?;
        info!(
            issuer = %self.api.description(),
            environment = %discovered.environment,
            api_version = %discovered.api_version,
            "Discovered issuer"
        );

        let config = self.api.get_config().await.map_err(CiError::ConfigFetch)?.config;
        let role = config.resolve_role(&request.role)?;
        let policy = config.resolve_policy(&role.workflow)?;
        info!(role = %role.name, policy = %policy.name, "Target role for authentication");

        let started = self.api.workflow_start().await.map_err(CiError::WorkflowStart)?;

        let engine: Arc<dyn ApprovalEngine> = match &self.engine {
            Some(engine) => engine.clone(),
            None => {
                info!(base_url = %config.workflow.base_url, "Using workflow engine");
                Arc::new(HttpApprovalEngine::new(config.workflow.base_url.clone()))
            }
        };
        let workflow = WorkflowClient::new(engine)
            .with_sleeper(self.sleeper.clone())
            .with_poll_interval(self.poll_interval);

        let workflow_request = WorkflowRequest {
            idp_nonce: started.idp_nonce.clone(),
            requester: Requester {
                name: request.name.clone(),
                username: request.username.clone(),
                email: request.email.clone(),
            },
            source: Source {
                description: request.description.clone(),
                details_uri: request.details_url.clone(),
            },
            target: Target {
                environment_name: config.name.clone(),
                environment_discovery_uri: request.issuer_url.clone(),
            },
        };
        let assertions = workflow.obtain_assertions(&workflow_request, policy).await?;

        let issued = self
            .api
            .workflow_auth(&WorkflowAuthRequest {
                username: request.username.clone(),
                role: request.role.clone(),
                issuing_nonce: started.issuing_nonce,
                idp_nonce: started.idp_nonce,
                assertions,
            })
            .await
            .map_err(CiError::Issuance)?;
        info!(credentials = issued.credentials.len(), "Received credentials");

        let persisted = save_iam_credentials(
            &request.aws_credentials_file,
            &issued.credentials,
            request.aws_profile_name.as_deref(),
        )?;

        Ok(CiOutcome {
            environment: config.name,
            credentials: issued.credentials,
            persisted,
        })
    }
}
