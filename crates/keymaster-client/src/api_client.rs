//! Issuer API client

use async_trait::async_trait;
use keymaster_core::api::{
    ConfigResponse, DiscoveryResponse, ErrorResponse, WorkflowAuthRequest, WorkflowAuthResponse,
    WorkflowStartResponse,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiClientError;

/// Trait for talking to a credential issuer
#[async_trait]
pub trait IssuerApi: Send + Sync {
    async fn discovery(&self) -> Result<DiscoveryResponse, ApiClientError>;

    async fn get_config(&self) -> Result<ConfigResponse, ApiClientError>;

    /// Mint the nonce pair for one authentication attempt
    async fn workflow_start(&self) -> Result<WorkflowStartResponse, ApiClientError>;

    /// Redeem the nonce pair and assertions for credentials
    async fn workflow_auth(&self, request: &WorkflowAuthRequest) -> Result<WorkflowAuthResponse, ApiClientError>;

    /// Get a description of this client (for logging)
    fn description(&self) -> &str {
        "issuer api"
    }
}

/// Issuer API over HTTP
pub struct HttpIssuerApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpIssuerApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl IssuerApi for HttpIssuerApi {
    async fn discovery(&self) -> Result<DiscoveryResponse, ApiClientError> {
        let response = self.client.get(self.url("/v1/discovery")).send().await?;
        decode_response(response).await
    }

    async fn get_config(&self) -> Result<ConfigResponse, ApiClientError> {
        let response = self.client.get(self.url("/v1/config")).send().await?;
        decode_response(response).await
    }

    async fn workflow_start(&self) -> Result<WorkflowStartResponse, ApiClientError> {
        let response = self.client.post(self.url("/v1/workflow/start")).send().await?;
        decode_response(response).await
    }

    async fn workflow_auth(&self, request: &WorkflowAuthRequest) -> Result<WorkflowAuthResponse, ApiClientError> {
        let response = self
            .client
            .post(self.url("/v1/workflow/auth"))
            .json(request)
            .send()
            .await?;
        decode_response(response).await
    }

    fn description(&self) -> &str {
        &self.base_url
    }
}

/// Decode a JSON body, turning non-success statuses into `Status` errors
pub(crate) async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiClientError> {
    let status = response.status();
    let url = response.url().to_string();
    let body = response.bytes().await?;
    debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Received response");

    if !status.is_success() {
        let (code, message) = match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(error) => (error.code, error.error),
            Err(_) => (String::new(), String::from_utf8_lossy(&body).into_owned()),
        };
        return Err(ApiClientError::Status {
            status: status.as_u16(),
            code,
            message,
        });
    }

    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpIssuerApi::new("https://km.example.com/");
        assert_eq!(api.url("/v1/discovery"), "https://km.example.com/v1/discovery");
        assert_eq!(api.description(), "https://km.example.com");
    }
}
