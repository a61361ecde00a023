//! Issued credentials and the principal they are issued to

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// The authenticated identity on whose behalf credentials are issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Username as asserted by the identity provider
    pub username: String,

    /// Role the credentials were requested for
    pub role: String,

    /// Role claims proven by the requester's own assertions
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Principal {
    pub fn new(username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: role.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }
}

/// A credential produced by one issuance backend
///
/// Wire shape: `{"name": …, "type": "iam", "expiry": 1700000000, "value": {…}}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawCredential")]
pub struct Credential {
    /// Name of the backend that issued it
    pub name: String,

    /// Expiry as unix seconds
    pub expiry: i64,

    pub value: CredentialValue,
}

impl Credential {
    pub fn new(name: impl Into<String>, expires_at: DateTime<Utc>, value: CredentialValue) -> Self {
        Self {
            name: name.into(),
            expiry: expires_at.timestamp(),
            value,
        }
    }

    /// Kind discriminator ("iam", "ssh", "kubernetes", "wrapped")
    pub fn kind(&self) -> &'static str {
        self.value.kind()
    }

    /// Expiry as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expiry, 0)
    }

    /// The cloud access-key payload, if this is one
    pub fn as_iam(&self) -> Option<&IamCredential> {
        match &self.value {
            CredentialValue::Iam(iam) => Some(iam),
            _ => None,
        }
    }
}

/// Kind-specific credential payload
#[derive(Clone, PartialEq)]
pub enum CredentialValue {
    Iam(IamCredential),
    Ssh(SshCredential),
    Kubernetes(KubernetesCredential),
    Wrapped(WrappedCredential),
}

impl CredentialValue {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialValue::Iam(_) => "iam",
            CredentialValue::Ssh(_) => "ssh",
            CredentialValue::Kubernetes(_) => "kubernetes",
            CredentialValue::Wrapped(_) => "wrapped",
        }
    }

    /// JSON form of the payload alone (what delivery wrapping encrypts)
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            CredentialValue::Iam(v) => serde_json::to_vec(v),
            CredentialValue::Ssh(v) => serde_json::to_vec(v),
            CredentialValue::Kubernetes(v) => serde_json::to_vec(v),
            CredentialValue::Wrapped(v) => serde_json::to_vec(v),
        }
    }
}

// Secret material stays out of logs
impl std::fmt::Debug for CredentialValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialValue::Iam(iam) => f
                .debug_struct("Iam")
                .field("profile_name", &iam.profile_name)
                .field("role_arn", &iam.role_arn)
                .field("access_key_id", &iam.access_key_id)
                .finish_non_exhaustive(),
            CredentialValue::Ssh(ssh) => f
                .debug_struct("Ssh")
                .field("principals", &ssh.principals)
                .finish_non_exhaustive(),
            CredentialValue::Kubernetes(kube) => f
                .debug_struct("Kubernetes")
                .field("username", &kube.username)
                .field("groups", &kube.groups)
                .finish_non_exhaustive(),
            CredentialValue::Wrapped(wrapped) => f
                .debug_struct("Wrapped")
                .field("key_id", &wrapped.key_id)
                .field("wrapped_type", &wrapped.wrapped_type)
                .finish_non_exhaustive(),
        }
    }
}

/// Cloud access-key triple from a role assumption
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamCredential {
    /// Profile the credential is written under locally
    pub profile_name: String,
    pub role_arn: String,
    pub role_session_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

/// Ephemeral SSH key pair with a CA-signed certificate
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredential {
    pub principals: Vec<String>,
    /// OpenSSH private key
    pub private_key: String,
    /// OpenSSH certificate line
    pub certificate: String,
}

/// Cluster client certificate
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesCredential {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    /// PEM private key
    pub private_key: String,
    /// PEM client certificate
    pub certificate: String,
    /// PEM cluster CA certificate
    pub ca_certificate: String,
}

/// A credential payload envelope-encrypted for delivery
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedCredential {
    /// Key the payload was encrypted under
    pub key_id: String,
    /// Kind of the encrypted payload
    pub wrapped_type: String,
    /// Base64 ciphertext
    pub ciphertext: String,
}

#[derive(Deserialize)]
struct RawCredential {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    expiry: i64,
    value: serde_json::Value,
}

impl TryFrom<RawCredential> for Credential {
    type Error = String;

    fn try_from(raw: RawCredential) -> Result<Self, Self::Error> {
        let invalid = |e: serde_json::Error| format!("credential '{}' ({}): {}", raw.name, raw.kind, e);
        let value = match raw.kind.as_str() {
            "iam" => CredentialValue::Iam(serde_json::from_value(raw.value.clone()).map_err(invalid)?),
            "ssh" => CredentialValue::Ssh(serde_json::from_value(raw.value.clone()).map_err(invalid)?),
            "kubernetes" => CredentialValue::Kubernetes(serde_json::from_value(raw.value.clone()).map_err(invalid)?),
            "wrapped" => CredentialValue::Wrapped(serde_json::from_value(raw.value.clone()).map_err(invalid)?),
            other => return Err(format!("credential '{}' has unknown type '{}'", raw.name, other)),
        };
        Ok(Credential {
            name: raw.name,
            expiry: raw.expiry,
            value,
        })
    }
}

impl Serialize for Credential {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Credential", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("type", self.kind())?;
        state.serialize_field("expiry", &self.expiry)?;
        match &self.value {
            CredentialValue::Iam(v) => state.serialize_field("value", v)?,
            CredentialValue::Ssh(v) => state.serialize_field("value", v)?,
            CredentialValue::Kubernetes(v) => state.serialize_field("value", v)?,
            CredentialValue::Wrapped(v) => state.serialize_field("value", v)?,
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iam() -> Credential {
        Credential {
            name: "nonprod-deployment".into(),
            expiry: 1,
            value: CredentialValue::Iam(IamCredential {
                profile_name: "Foo".into(),
                role_arn: "Bar".into(),
                role_session_name: "123".into(),
                access_key_id: "abc".into(),
                secret_access_key: "def".into(),
                session_token: "ghi".into(),
            }),
        }
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(iam()).unwrap();
        assert_eq!(json["type"], "iam");
        assert_eq!(json["expiry"], 1);
        assert_eq!(json["value"]["access_key_id"], "abc");

        let back: Credential = serde_json::from_value(json).unwrap();
        assert_eq!(back, iam());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = serde_json::json!({"name": "x", "type": "gpg", "expiry": 0, "value": {}});
        assert!(serde_json::from_value::<Credential>(json).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", iam());
        assert!(rendered.contains("abc"));
        assert!(!rendered.contains("def"));
        assert!(!rendered.contains("ghi"));
    }

    #[test]
    fn test_as_iam() {
        assert_eq!(iam().as_iam().unwrap().profile_name, "Foo");
        let ssh = Credential::new(
            "ssh-all",
            Utc::now(),
            CredentialValue::Ssh(SshCredential {
                principals: vec!["alice".into()],
                private_key: String::new(),
                certificate: String::new(),
            }),
        );
        assert!(ssh.as_iam().is_none());
        assert_eq!(ssh.kind(), "ssh");
    }
}
