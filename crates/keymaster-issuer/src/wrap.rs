//! Delivery wrapping
//!
//! A role may require its credentials to be encrypted under a key service
//! key before they leave the issuer. Wrapping applies to the serialized
//! credential value after issuance, the same way for every kind:
//!
//! ```text
//! {name, type, expiry, value}  ->  {name, "wrapped", expiry, {key_id, wrapped_type, Enc(key_id, value)}}
//! ```

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use keymaster_core::credential::WrappedCredential;
use keymaster_core::{Credential, CredentialValue};
use tracing::debug;

use crate::error::WrapError;

/// Trait for key services that encrypt credential payloads
#[async_trait]
pub trait KeyWrapper: Send + Sync {
    /// Encrypt a payload under the given key, returning the ciphertext
    async fn wrap(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, WrapError>;

    /// Get a description of this key service (for logging)
    fn description(&self) -> &str {
        "key wrapper"
    }
}

/// Replace a credential's value by its wrapped form
///
/// Already wrapped credentials are returned unchanged.
pub async fn wrap_credential(
    wrapper: &dyn KeyWrapper,
    key_id: &str,
    credential: Credential,
) -> Result<Credential, WrapError> {
    if matches!(credential.value, CredentialValue::Wrapped(_)) {
        return Ok(credential);
    }

    let plaintext = credential.value.to_json()?;
    let ciphertext = wrapper.wrap(key_id, &plaintext).await?;

    debug!(
        credential = %credential.name,
        wrapped_type = credential.kind(),
        key_service = wrapper.description(),
        "Wrapped credential"
    );

    Ok(Credential {
        value: CredentialValue::Wrapped(WrappedCredential {
            key_id: key_id.to_string(),
            wrapped_type: credential.kind().to_string(),
            ciphertext: STANDARD.encode(ciphertext),
        }),
        ..credential
    })
}
