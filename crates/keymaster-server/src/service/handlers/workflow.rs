//! Workflow handlers
//!
//! `workflow_start` mints the nonce pair a client threads through the
//! approval engine; `workflow_auth` redeems it, checks the policy's
//! assertions and runs the issuance engine.

use axum::{
    extract::{ConnectInfo, State},
    Json,
};
use keymaster_core::api::{WorkflowAuthRequest, WorkflowAuthResponse, WorkflowStartResponse};
use keymaster_core::Principal;
use keymaster_issuer::Issuer;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::service::assertions::{evaluate_policy, requester_groups, VerifiedAssertion};
use crate::service::error::ApiError;

/// Start a workflow
///
/// POST /v1/workflow/start
pub async fn workflow_start(State(state): State<Arc<AppState>>) -> Result<Json<WorkflowStartResponse>, ApiError> {
    let issuing_nonce = Uuid::new_v4().to_string();
    let idp_nonce = Uuid::new_v4().to_string();

    state.nonces.insert(issuing_nonce.clone(), idp_nonce.clone()).await?;

    Ok(Json(WorkflowStartResponse { issuing_nonce, idp_nonce }))
}

/// Redeem a workflow and issue the role's credentials
///
/// POST /v1/workflow/auth
///
/// 1. Checks the client address against the access control list
/// 2. Consumes the issuing nonce and matches its idp nonce
/// 3. Verifies assertions and evaluates the role's policy
/// 4. Issues every credential the role lists, in order
pub async fn workflow_auth(
    State(state): State<Arc<AppState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Json(request): Json<WorkflowAuthRequest>,
) -> Result<Json<WorkflowAuthResponse>, ApiError> {
    if !state.config.access_control.permits(client.ip()) {
        warn!(client = %client.ip(), role = %request.role, "Client address not permitted");
        return Err(ApiError::Forbidden(format!("client address {} not permitted", client.ip())));
    }

    if request.username.is_empty() {
        return Err(ApiError::BadRequest("username is required".into()));
    }

    // Consumed before anything else so a failed attempt cannot be replayed
    let idp_nonce = state
        .nonces
        .take(&request.issuing_nonce)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("unknown or already used issuing nonce".into()))?;

    if idp_nonce != request.idp_nonce {
        warn!(role = %request.role, username = %request.username, "Idp nonce does not match issuing nonce");
        return Err(ApiError::Unauthorized("idp nonce does not match the workflow".into()));
    }

    let role = state.config.resolve_role(&request.role)?;
    let policy = state.config.resolve_policy(&role.workflow)?;

    let groups = if policy.requires_workflow() {
        let verified = request
            .assertions
            .iter()
            .map(|assertion| state.verifier.verify(&policy.idp_name, assertion, &idp_nonce))
            .collect::<Result<Vec<VerifiedAssertion>, _>>()?;

        evaluate_policy(policy, &request.username, &verified)?;
        requester_groups(&request.username, &verified)
    } else {
        info!(
            role = %role.name,
            policy = %policy.name,
            username = %request.username,
            workflow_skipped = true,
            "Policy requires no workflow"
        );
        Vec::new()
    };

    let principal = Principal::new(&request.username, &role.name).with_groups(groups);
    let issuer = Issuer::from_config(role, &state.config, &state.registry, state.wrapper.clone())?;
    let credentials = issuer.issue_for(&principal).await?;

    info!(
        role = %role.name,
        username = %principal.username,
        credentials = credentials.len(),
        client = %client.ip(),
        "Issued credentials"
    );

    Ok(Json(WorkflowAuthResponse { credentials }))
}
