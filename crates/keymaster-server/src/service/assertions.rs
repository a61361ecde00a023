//! Workflow assertion verification and policy evaluation
//!
//! Assertions are produced by the approval engine, one per identifying or
//! approving user, and signed by the policy's identity provider. Every
//! assertion must be bound to the idp nonce the workflow was started with.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use keymaster_core::{Config, IdpProvider, WorkflowPolicyConfig};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors from verifying an assertion
#[derive(Error, Debug)]
pub enum AssertionError {
    /// The policy names an IdP the verifier was not built with
    #[error("Unknown idp: {0}")]
    UnknownIdp(String),

    /// The IdP's assertion format is not verified by this service
    #[error("Assertions from {kind} idp '{name}' are not supported")]
    Unsupported { name: String, kind: &'static str },

    /// The IdP's verification key or algorithm is unusable
    #[error("Invalid verification key for idp '{name}': {reason}")]
    InvalidKey { name: String, reason: String },

    /// Signature, expiry or audience check failed
    #[error("Assertion rejected: {0}")]
    Rejected(String),

    /// The assertion is bound to a different workflow
    #[error("Assertion nonce does not match the workflow")]
    NonceMismatch,

    #[error("Assertion is missing claim: {0}")]
    MissingClaim(String),
}

impl From<jsonwebtoken::errors::Error> for AssertionError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AssertionError::Rejected(err.to_string())
    }
}

/// Errors from evaluating a policy against verified assertions
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    #[error("requires {required} identifying assertion(s) with '{claim}', found {found}")]
    IdentifyNotMet { claim: String, required: u32, found: u32 },

    #[error("requires {required} approver(s) with '{claim}', found {found}")]
    ApproversNotMet { claim: String, required: u32, found: u32 },
}

/// What a verified assertion says about its user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAssertion {
    pub username: String,
    pub groups: Vec<String>,
}

impl VerifiedAssertion {
    pub fn has_claim(&self, claim: &str) -> bool {
        self.groups.iter().any(|g| g == claim)
    }
}

// =============================================================================
// Verification
// =============================================================================

enum IdpVerifier {
    Jwt {
        key: DecodingKey,
        validation: Validation,
        username_claim: String,
        groups_claim: String,
    },
    Unsupported {
        kind: &'static str,
    },
}

/// Verifies assertions against the IdPs of one config snapshot
pub struct AssertionVerifier {
    idps: HashMap<String, IdpVerifier>,
}

#[derive(Debug, Deserialize)]
struct AssertionClaims {
    nonce: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

impl AssertionVerifier {
    /// Prepare verification keys for every IdP in the snapshot
    ///
    /// The snapshot must already be normalised so keys are PEM or secrets.
    pub fn from_config(config: &Config) -> Result<Self, AssertionError> {
        let mut idps = HashMap::new();

        for idp in &config.idp {
            let verifier = match &idp.provider {
                IdpProvider::Jwt(jwt) => {
                    let invalid = |reason: String| AssertionError::InvalidKey {
                        name: idp.name.clone(),
                        reason,
                    };
                    let algorithm = Algorithm::from_str(&jwt.algorithm).map_err(|e| invalid(e.to_string()))?;
                    let key = decoding_key(algorithm, jwt.verification_key.as_bytes()).map_err(|e| invalid(e.to_string()))?;

                    let mut validation = Validation::new(algorithm);
                    if jwt.audience.is_empty() {
                        validation.validate_aud = false;
                    } else {
                        validation.set_audience(&[&jwt.audience]);
                    }

                    IdpVerifier::Jwt {
                        key,
                        validation,
                        username_claim: jwt.username_claim.clone(),
                        groups_claim: jwt.groups_claim.clone(),
                    }
                }
                other => IdpVerifier::Unsupported { kind: other.kind() },
            };
            idps.insert(idp.name.clone(), verifier);
        }

        Ok(Self { idps })
    }

    /// Verify one assertion from `idp_name` bound to `idp_nonce`
    pub fn verify(&self, idp_name: &str, assertion: &str, idp_nonce: &str) -> Result<VerifiedAssertion, AssertionError> {
        let verifier = self
            .idps
            .get(idp_name)
            .ok_or_else(|| AssertionError::UnknownIdp(idp_name.to_string()))?;

        match verifier {
            IdpVerifier::Jwt {
                key,
                validation,
                username_claim,
                groups_claim,
            } => {
                let claims = decode::<AssertionClaims>(assertion, key, validation)?.claims;

                if claims.nonce.as_deref() != Some(idp_nonce) {
                    return Err(AssertionError::NonceMismatch);
                }

                let username = claims
                    .extra
                    .get(username_claim)
                    .and_then(|v| v.as_str())
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| AssertionError::MissingClaim(username_claim.clone()))?
                    .to_string();

                let groups = match claims.extra.get(groups_claim) {
                    Some(serde_json::Value::Array(values)) => {
                        values.iter().filter_map(|v| v.as_str().map(String::from)).collect()
                    }
                    Some(serde_json::Value::String(single)) => vec![single.clone()],
                    _ => Vec::new(),
                };

                debug!(idp = %idp_name, username = %username, groups = ?groups, "Verified assertion");
                Ok(VerifiedAssertion { username, groups })
            }
            IdpVerifier::Unsupported { kind } => Err(AssertionError::Unsupported {
                name: idp_name.to_string(),
                kind,
            }),
        }
    }
}

fn decoding_key(algorithm: Algorithm, key: &[u8]) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(DecodingKey::from_secret(key)),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(key),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(key),
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(key),
    }
}

// =============================================================================
// Policy evaluation
// =============================================================================

/// Check verified assertions against a policy's requirements
///
/// - identify: assertions by the requester carrying the claim
/// - approver: distinct users carrying the claim; the requester counts only
///   when `requester_can_approve` is set
pub fn evaluate_policy(
    policy: &WorkflowPolicyConfig,
    requester: &str,
    assertions: &[VerifiedAssertion],
) -> Result<(), PolicyError> {
    for (claim, &required) in &policy.identify_roles {
        let found = assertions
            .iter()
            .filter(|a| a.username == requester && a.has_claim(claim))
            .count() as u32;
        if found < required {
            return Err(PolicyError::IdentifyNotMet {
                claim: claim.clone(),
                required,
                found,
            });
        }
    }

    for (claim, &required) in &policy.approver_roles {
        let approvers: BTreeSet<&str> = assertions
            .iter()
            .filter(|a| a.has_claim(claim))
            .filter(|a| policy.requester_can_approve || a.username != requester)
            .map(|a| a.username.as_str())
            .collect();
        let found = approvers.len() as u32;
        if found < required {
            return Err(PolicyError::ApproversNotMet {
                claim: claim.clone(),
                required,
                found,
            });
        }
    }

    Ok(())
}

/// Role claims proven by the requester's own assertions
pub fn requester_groups(requester: &str, assertions: &[VerifiedAssertion]) -> Vec<String> {
    let groups: BTreeSet<&str> = assertions
        .iter()
        .filter(|a| a.username == requester)
        .flat_map(|a| a.groups.iter().map(String::as_str))
        .collect();
    groups.into_iter().map(String::from).collect()
}
