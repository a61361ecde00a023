//! Configuration snapshot model
//!
//! A [`Config`] is loaded once, validated, has its embedded resource
//! references dereferenced, and is then treated as immutable. Every lookup
//! is an exact name match over that snapshot.
//!
//! Credential backends and identity providers are closed tagged variants.
//! On the wire they share one shape:
//!
//! ```json
//! { "name": "ssh-all", "type": "ssh_ca", "config": { "ca_key": "s3://bucket/sshca.key" } }
//! ```

use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::resource::ResourceLoader;

/// Placeholder substituted with the principal's username in SSH principals
pub const IDP_USER_PLACEHOLDER: &str = "$idpuser";

// =============================================================================
// Snapshot
// =============================================================================

/// A complete configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Environment name (e.g. "fooproject_nonprod")
    pub name: String,

    /// Config schema version
    #[serde(default)]
    pub version: String,

    /// Identity providers that sign workflow assertions
    #[serde(default)]
    pub idp: Vec<IdpConfig>,

    /// Roles a requester can apply for
    #[serde(default)]
    pub roles: Vec<RoleConfig>,

    /// Credential backends referenced by roles
    #[serde(default)]
    pub credentials: Vec<CredentialsConfig>,

    /// Approval engine location and policies
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Network access restrictions for the issuer
    #[serde(default)]
    pub access_control: AccessControlConfig,

    /// Set once resource references have been dereferenced
    #[serde(skip)]
    normalised: bool,
}

impl Config {
    /// Parse, validate and normalise a snapshot
    ///
    /// This is the only way the issuer builds a config it will serve from;
    /// any failure aborts the whole load.
    pub async fn load(data: &[u8], loader: &ResourceLoader) -> Result<Self> {
        let mut config = Self::from_slice(data)?;
        config.validate()?;
        config.normalise_and_load(loader).await?;

        info!(
            name = %config.name,
            version = %config.version,
            roles = config.roles.len(),
            credentials = config.credentials.len(),
            policies = config.workflow.policies.len(),
            "Loaded config snapshot"
        );

        Ok(config)
    }

    /// Parse a JSON or YAML snapshot without validating or normalising it
    ///
    /// A document whose first non-blank character is `{` is read as JSON,
    /// anything else as YAML.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let is_json = data
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');
        if is_json {
            Self::from_json(data)
        } else {
            Self::from_yaml(data)
        }
    }

    /// Parse a snapshot from JSON without validating or normalising it
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Self::from_document(serde_json::from_slice(data)?)
    }

    /// Parse a snapshot from YAML without validating or normalising it
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        Self::from_document(serde_yaml::from_slice(data)?)
    }

    fn from_document(document: serde_json::Value) -> Result<Self> {
        // Typed entries are checked first so a bad block reports which
        // backend or idp it belongs to.
        check_typed_entries::<CredentialsConfig>(&document, "credentials")?;
        check_typed_entries::<IdpConfig>(&document, "idp")?;

        Ok(serde_json::from_value(document)?)
    }

    /// Serialize the snapshot to JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Find a role by name
    pub fn resolve_role(&self, name: &str) -> Result<&RoleConfig> {
        self.roles
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| ConfigError::not_found("role", name))
    }

    /// Find a credential backend by name
    pub fn resolve_credential_backend(&self, name: &str) -> Result<&CredentialsConfig> {
        self.credentials
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ConfigError::not_found("credential", name))
    }

    /// Find a workflow policy by name
    pub fn resolve_policy(&self, name: &str) -> Result<&WorkflowPolicyConfig> {
        self.workflow
            .policies
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::not_found("workflow policy", name))
    }

    /// Find an identity provider by name
    pub fn resolve_idp(&self, name: &str) -> Result<&IdpConfig> {
        self.idp
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| ConfigError::not_found("idp", name))
    }

    // =========================================================================
    // Validation & normalisation
    // =========================================================================

    /// Check cross references and value ranges
    pub fn validate(&self) -> Result<()> {
        check_unique("role", self.roles.iter().map(|r| r.name.as_str()))?;
        check_unique("credential", self.credentials.iter().map(|c| c.name.as_str()))?;
        check_unique("workflow policy", self.workflow.policies.iter().map(|p| p.name.as_str()))?;
        check_unique("idp", self.idp.iter().map(|i| i.name.as_str()))?;

        for role in &self.roles {
            if role.valid_for_seconds == 0 {
                return Err(ConfigError::Invalid(format!(
                    "role '{}' must have valid_for_seconds > 0",
                    role.name
                )));
            }
            for credential in &role.credentials {
                self.resolve_credential_backend(credential)?;
            }
            self.resolve_policy(&role.workflow)?;
        }

        for policy in &self.workflow.policies {
            if policy.idp_name.is_empty() {
                if policy.requires_workflow() {
                    return Err(ConfigError::Invalid(format!(
                        "workflow policy '{}' has requirements but no idp_name",
                        policy.name
                    )));
                }
            } else {
                self.resolve_idp(&policy.idp_name)?;
            }
        }

        for cidr in &self.access_control.ip_oracle.white_list_cidrs {
            if parse_cidr(cidr).is_none() {
                return Err(ConfigError::Invalid(format!("invalid CIDR '{}'", cidr)));
            }
        }

        Ok(())
    }

    /// Whether resource references have already been dereferenced
    pub fn is_normalised(&self) -> bool {
        self.normalised
    }

    /// Dereference every embedded certificate/key reference in place
    ///
    /// Runs at most once per snapshot; later calls return immediately.
    pub async fn normalise_and_load(&mut self, loader: &ResourceLoader) -> Result<()> {
        if self.normalised {
            debug!(name = %self.name, "Config already normalised");
            return Ok(());
        }

        for idp in &mut self.idp {
            match &mut idp.provider {
                IdpProvider::Saml(saml) => {
                    load_field(loader, &mut saml.certificate, format!("idp[{}].certificate", idp.name)).await?;
                }
                IdpProvider::Jwt(jwt) => {
                    load_field(loader, &mut jwt.verification_key, format!("idp[{}].verification_key", idp.name)).await?;
                }
            }
        }

        for credential in &mut self.credentials {
            match &mut credential.backend {
                CredentialBackend::SshCa(ssh) => {
                    load_field(loader, &mut ssh.ca_key, format!("credentials[{}].ca_key", credential.name)).await?;
                }
                CredentialBackend::Kubernetes(kube) => {
                    load_field(loader, &mut kube.ca_key, format!("credentials[{}].ca_key", credential.name)).await?;
                    load_field(loader, &mut kube.ca_cert, format!("credentials[{}].ca_cert", credential.name)).await?;
                }
                CredentialBackend::IamAssumeRole(_) | CredentialBackend::IamUser(_) => {}
            }
        }

        self.normalised = true;
        Ok(())
    }

    /// The public snapshot served to clients
    ///
    /// CA private keys and HMAC shared secrets are blanked. Public
    /// verification keys and certificates are kept.
    pub fn redacted(&self) -> Config {
        let mut public = self.clone();
        for idp in &mut public.idp {
            if let IdpProvider::Jwt(jwt) = &mut idp.provider {
                if jwt.is_shared_secret() {
                    jwt.verification_key.clear();
                }
            }
        }
        for credential in &mut public.credentials {
            match &mut credential.backend {
                CredentialBackend::SshCa(ssh) => ssh.ca_key.clear(),
                CredentialBackend::Kubernetes(kube) => kube.ca_key.clear(),
                CredentialBackend::IamAssumeRole(_) | CredentialBackend::IamUser(_) => {}
            }
        }
        public
    }
}

async fn load_field(loader: &ResourceLoader, value: &mut String, field: String) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    let loaded = loader
        .load_string(value)
        .await
        .map_err(|source| ConfigError::Resource { field, source })?;
    *value = loaded;
    Ok(())
}

fn check_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::Invalid(format!("duplicate {} name '{}'", kind, name)));
        }
    }
    Ok(())
}

fn check_typed_entries<T>(document: &serde_json::Value, field: &str) -> Result<()>
where
    T: TryFrom<RawTyped, Error = ConfigError>,
{
    if let Some(entries) = document.get(field).and_then(serde_json::Value::as_array) {
        for entry in entries {
            let raw: RawTyped = serde_json::from_value(entry.clone())?;
            T::try_from(raw)?;
        }
    }
    Ok(())
}

// =============================================================================
// Typed entries (shared wire shape)
// =============================================================================

/// `{name, type, config}` before the `type` discriminator is applied
#[derive(Debug, Deserialize)]
pub struct RawTyped {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    config: serde_json::Value,
}

fn parse_params<T: DeserializeOwned>(config: serde_json::Value) -> std::result::Result<T, String> {
    let config = if config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        config
    };
    serde_json::from_value(config).map_err(|e| e.to_string())
}

fn serialize_typed<S, P>(serializer: S, name: &str, kind: &str, params: &P) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    P: Serialize,
{
    let mut state = serializer.serialize_struct("Typed", 3)?;
    state.serialize_field("name", name)?;
    state.serialize_field("type", kind)?;
    state.serialize_field("config", params)?;
    state.end()
}

// =============================================================================
// Identity providers
// =============================================================================

/// An identity provider binding
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTyped")]
pub struct IdpConfig {
    pub name: String,
    pub provider: IdpProvider,
}

/// Provider-specific IdP parameters
#[derive(Debug, Clone, PartialEq)]
pub enum IdpProvider {
    Saml(SamlIdpConfig),
    Jwt(JwtIdpConfig),
}

impl IdpProvider {
    pub fn kind(&self) -> &'static str {
        match self {
            IdpProvider::Saml(_) => "saml",
            IdpProvider::Jwt(_) => "jwt",
        }
    }
}

/// SAML IdP parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlIdpConfig {
    /// Signing certificate (resource reference)
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub username_attr: String,
    #[serde(default)]
    pub email_attr: String,
    #[serde(default)]
    pub groups_attr: String,
    #[serde(default)]
    pub redirect_uri: String,
}

/// JWT IdP parameters: assertions are JWTs signed by this provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JwtIdpConfig {
    /// PEM public key, or the shared secret for HMAC algorithms (resource reference)
    pub verification_key: String,

    /// JWS algorithm name, e.g. "RS256", "ES256", "EdDSA", "HS256"
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// Expected `aud` claim
    #[serde(default)]
    pub audience: String,

    /// Claim holding the asserted username
    #[serde(default = "default_username_claim")]
    pub username_claim: String,

    /// Claim holding the asserted role claims
    #[serde(default = "default_groups_claim")]
    pub groups_claim: String,
}

impl JwtIdpConfig {
    /// Whether `verification_key` is a shared secret rather than a public key
    pub fn is_shared_secret(&self) -> bool {
        self.algorithm.to_ascii_uppercase().starts_with("HS")
    }
}

fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}

fn default_username_claim() -> String {
    "sub".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

impl TryFrom<RawTyped> for IdpConfig {
    type Error = ConfigError;

    fn try_from(raw: RawTyped) -> Result<Self> {
        let invalid = |reason: String| ConfigError::IdpParse {
            name: raw.name.clone(),
            kind: raw.kind.clone(),
            reason,
        };
        let provider = match raw.kind.as_str() {
            "saml" => IdpProvider::Saml(parse_params(raw.config.clone()).map_err(invalid)?),
            "jwt" => IdpProvider::Jwt(parse_params(raw.config.clone()).map_err(invalid)?),
            other => {
                return Err(ConfigError::UnknownIdpKind {
                    name: raw.name,
                    kind: other.to_string(),
                })
            }
        };
        Ok(IdpConfig {
            name: raw.name,
            provider,
        })
    }
}

impl Serialize for IdpConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.provider {
            IdpProvider::Saml(p) => serialize_typed(serializer, &self.name, "saml", p),
            IdpProvider::Jwt(p) => serialize_typed(serializer, &self.name, "jwt", p),
        }
    }
}

// =============================================================================
// Credential backends
// =============================================================================

/// The closed set of credential backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Cloud role assumption
    IamAssumeRole,
    /// SSH certificate authority
    SshCa,
    /// Cluster (Kubernetes) certificate authority
    Kubernetes,
    /// Cloud user credentials
    IamUser,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::IamAssumeRole => "iam_assume_role",
            BackendKind::SshCa => "ssh_ca",
            BackendKind::Kubernetes => "kubernetes",
            BackendKind::IamUser => "iam_user",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "iam_assume_role" => Ok(BackendKind::IamAssumeRole),
            "ssh_ca" => Ok(BackendKind::SshCa),
            "kubernetes" => Ok(BackendKind::Kubernetes),
            "iam_user" => Ok(BackendKind::IamUser),
            _ => Err(format!("Unknown credential backend type: {}", s)),
        }
    }
}

/// A named credential backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTyped")]
pub struct CredentialsConfig {
    pub name: String,
    pub backend: CredentialBackend,
}

/// Kind-specific backend parameters; exactly one variant per backend
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialBackend {
    IamAssumeRole(AssumeRoleConfig),
    SshCa(SshCaConfig),
    Kubernetes(KubernetesCaConfig),
    IamUser(IamUserConfig),
}

impl CredentialBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            CredentialBackend::IamAssumeRole(_) => BackendKind::IamAssumeRole,
            CredentialBackend::SshCa(_) => BackendKind::SshCa,
            CredentialBackend::Kubernetes(_) => BackendKind::Kubernetes,
            CredentialBackend::IamUser(_) => BackendKind::IamUser,
        }
    }
}

/// Parameters for `iam_assume_role`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssumeRoleConfig {
    /// Role ARN, or a bare role name in the issuer's own account
    #[serde(default)]
    pub target_role: String,
}

/// Parameters for `ssh_ca`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshCaConfig {
    /// OpenSSH private key of the CA (resource reference)
    #[serde(default)]
    pub ca_key: String,

    /// Principals written into issued certificates
    #[serde(default)]
    pub principals: Vec<String>,
}

/// Parameters for `kubernetes`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubernetesCaConfig {
    /// PEM private key of the cluster CA (resource reference)
    #[serde(default)]
    pub ca_key: String,

    /// PEM certificate of the cluster CA (resource reference)
    #[serde(default)]
    pub ca_cert: String,

    /// Groups (certificate organisations) granted to the user
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Parameters for `iam_user`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IamUserConfig {}

impl TryFrom<RawTyped> for CredentialsConfig {
    type Error = ConfigError;

    fn try_from(raw: RawTyped) -> Result<Self> {
        let kind: BackendKind = raw.kind.parse().map_err(|_| ConfigError::UnknownBackendKind {
            name: raw.name.clone(),
            kind: raw.kind.clone(),
        })?;
        let invalid = |reason: String| ConfigError::BackendParse {
            name: raw.name.clone(),
            kind: raw.kind.clone(),
            reason,
        };
        let config = raw.config.clone();
        let backend = match kind {
            BackendKind::IamAssumeRole => CredentialBackend::IamAssumeRole(parse_params(config).map_err(invalid)?),
            BackendKind::SshCa => CredentialBackend::SshCa(parse_params(config).map_err(invalid)?),
            BackendKind::Kubernetes => CredentialBackend::Kubernetes(parse_params(config).map_err(invalid)?),
            BackendKind::IamUser => CredentialBackend::IamUser(parse_params(config).map_err(invalid)?),
        };
        Ok(CredentialsConfig {
            name: raw.name,
            backend,
        })
    }
}

impl Serialize for CredentialsConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let kind = self.backend.kind().as_str();
        match &self.backend {
            CredentialBackend::IamAssumeRole(p) => serialize_typed(serializer, &self.name, kind, p),
            CredentialBackend::SshCa(p) => serialize_typed(serializer, &self.name, kind, p),
            CredentialBackend::Kubernetes(p) => serialize_typed(serializer, &self.name, kind, p),
            CredentialBackend::IamUser(p) => serialize_typed(serializer, &self.name, kind, p),
        }
    }
}

// =============================================================================
// Roles
// =============================================================================

/// A role a requester can apply for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,

    /// Credential backend names, issued in this order
    #[serde(default)]
    pub credentials: Vec<String>,

    /// Workflow policy name
    pub workflow: String,

    /// Lifetime of issued credentials
    pub valid_for_seconds: u64,

    #[serde(default)]
    pub credential_delivery: CredentialDeliveryConfig,
}

impl RoleConfig {
    /// Lifetime of issued credentials
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.valid_for_seconds)
    }

    /// Key that issued credentials must be wrapped under, if any
    pub fn wrap_key(&self) -> Option<&str> {
        self.credential_delivery
            .kms_wrap_with
            .as_deref()
            .filter(|k| !k.is_empty())
    }
}

/// How issued credentials are delivered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialDeliveryConfig {
    /// Envelope-encrypt issued credentials under this key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_wrap_with: Option<String>,
}

// =============================================================================
// Workflow
// =============================================================================

/// Approval engine location and policies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Base URL of the approval engine
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub policies: Vec<WorkflowPolicyConfig>,
}

/// Identification/approval requirements for a role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPolicyConfig {
    pub name: String,

    /// IdP whose assertions satisfy this policy
    #[serde(default)]
    pub idp_name: String,

    /// Whether the requester's own assertion counts as an approval
    #[serde(default)]
    pub requester_can_approve: bool,

    /// Role claim -> minimum number of identifying assertions
    #[serde(default)]
    pub identify_roles: BTreeMap<String, u32>,

    /// Role claim -> minimum number of distinct approvers
    #[serde(default)]
    pub approver_roles: BTreeMap<String, u32>,
}

impl WorkflowPolicyConfig {
    /// A policy with no identification and no approval requirements needs
    /// no workflow session at all.
    pub fn requires_workflow(&self) -> bool {
        !(self.identify_roles.is_empty() && self.approver_roles.is_empty())
    }
}

// =============================================================================
// Access control
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessControlConfig {
    #[serde(default)]
    pub ip_oracle: IpOracleConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpOracleConfig {
    /// Client networks allowed to request credentials; empty allows all
    #[serde(default)]
    pub white_list_cidrs: Vec<String>,
}

impl AccessControlConfig {
    /// Whether a client address may request credentials
    pub fn permits(&self, addr: IpAddr) -> bool {
        let cidrs = &self.ip_oracle.white_list_cidrs;
        if cidrs.is_empty() {
            return true;
        }
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
            v4 => v4,
        };
        cidrs
            .iter()
            .filter_map(|c| parse_cidr(c))
            .any(|(network, prefix)| cidr_contains(network, prefix, addr))
    }
}

fn parse_cidr(cidr: &str) -> Option<(IpAddr, u32)> {
    let (network, prefix) = match cidr.split_once('/') {
        Some((network, prefix)) => (network.parse::<IpAddr>().ok()?, prefix.parse::<u32>().ok()?),
        None => {
            let network = cidr.parse::<IpAddr>().ok()?;
            let full = if network.is_ipv4() { 32 } else { 128 };
            (network, full)
        }
    };
    let max = if network.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((network, prefix))
}

fn cidr_contains(network: IpAddr, prefix: u32, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(net), IpAddr::V4(a)) => {
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            u32::from(net) & mask == u32::from(a) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(a)) => {
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            u128::from(net) & mask == u128::from(a) & mask
        }
        _ => false,
    }
}
