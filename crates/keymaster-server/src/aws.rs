//! AWS-backed token service, key wrapping and blob storage
//!
//! Each client honours an endpoint override so the service can run against
//! a local emulator.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_kms::primitives::Blob;
use chrono::{DateTime, Utc};
use keymaster_core::{BlobStore, ResourceError};
use keymaster_issuer::backends::{AssumeRoleRequest, StsClient, StsCredentials};
use keymaster_issuer::{BackendError, KeyWrapper, WrapError};
use tracing::{debug, info, warn};

use crate::settings::ServerSettings;

/// Load the shared SDK config from the default provider chain
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::load_from_env().await
}

// =============================================================================
// STS
// =============================================================================

/// STS AssumeRole client
pub struct AwsSts {
    client: aws_sdk_sts::Client,
    account_id: Option<String>,
}

impl AwsSts {
    /// Build the client; the account comes from settings or, failing that,
    /// from the caller identity of the process credentials
    pub async fn new(sdk: &SdkConfig, settings: &ServerSettings) -> Self {
        let mut builder = aws_sdk_sts::config::Builder::from(sdk);
        if let Some(endpoint) = &settings.sts_endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = aws_sdk_sts::Client::from_conf(builder.build());

        let account_id = match &settings.aws_account_id {
            Some(account) => Some(account.clone()),
            None => match client.get_caller_identity().send().await {
                Ok(identity) => identity.account().map(String::from),
                Err(err) => {
                    warn!(
                        error = %aws_sdk_sts::error::DisplayErrorContext(&err),
                        "Could not discover account id; bare role names will not resolve"
                    );
                    None
                }
            },
        };

        if let Some(account) = &account_id {
            info!(account = %account, "STS client ready");
        }

        Self { client, account_id }
    }
}

#[async_trait]
impl StsClient for AwsSts {
    async fn assume_role(&self, request: AssumeRoleRequest) -> Result<StsCredentials, BackendError> {
        debug!(role_arn = %request.role_arn, session = %request.session_name, "Assuming role");

        let output = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .duration_seconds(request.duration.as_secs() as i32)
            .send()
            .await
            .map_err(|e| BackendError::Sts(aws_sdk_sts::error::DisplayErrorContext(&e).to_string()))?;

        let credentials = output
            .credentials()
            .ok_or_else(|| BackendError::Sts("AssumeRole returned no credentials".into()))?;

        Ok(StsCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration: DateTime::<Utc>::from_timestamp(credentials.expiration().secs(), 0),
        })
    }

    fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    fn description(&self) -> &str {
        "aws sts"
    }
}

// =============================================================================
// KMS
// =============================================================================

/// KMS Encrypt wrapper for credential delivery
pub struct AwsKms {
    client: aws_sdk_kms::Client,
}

impl AwsKms {
    pub fn new(sdk: &SdkConfig, settings: &ServerSettings) -> Self {
        let mut builder = aws_sdk_kms::config::Builder::from(sdk);
        if let Some(endpoint) = &settings.kms_endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self {
            client: aws_sdk_kms::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl KeyWrapper for AwsKms {
    async fn wrap(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, WrapError> {
        let output = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext))
            .send()
            .await
            .map_err(|e| WrapError::KeyService(aws_sdk_kms::error::DisplayErrorContext(&e).to_string()))?;

        output
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| WrapError::KeyService("Encrypt returned no ciphertext".into()))
    }

    fn description(&self) -> &str {
        "aws kms"
    }
}

// =============================================================================
// S3
// =============================================================================

/// S3 GetObject blob store for `s3://` resource references
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
}

impl S3BlobStore {
    pub fn new(sdk: &SdkConfig, settings: &ServerSettings) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(sdk);
        if let Some(endpoint) = &settings.s3_endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ResourceError> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ResourceError::BlobStore(aws_sdk_s3::error::DisplayErrorContext(&e).to_string()))?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| ResourceError::BlobStore(e.to_string()))?;

        Ok(body.into_bytes().to_vec())
    }

    fn description(&self) -> &str {
        "aws s3"
    }
}
