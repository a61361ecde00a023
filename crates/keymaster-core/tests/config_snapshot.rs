//! Config snapshot tests
//!
//! - Loading the example snapshot end to end (parse, validate, normalise)
//! - The YAML form of the example matching its JSON form
//! - Round-tripping arbitrary snapshots through JSON

use async_trait::async_trait;
use keymaster_core::config::{
    AssumeRoleConfig, IamUserConfig, JwtIdpConfig, KubernetesCaConfig, SshCaConfig,
    WorkflowConfig,
};
use keymaster_core::{
    BlobStore, Config, ConfigError, CredentialBackend, CredentialsConfig, IdpConfig, IdpProvider,
    ResourceError, ResourceLoader, RoleConfig, WorkflowPolicyConfig,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const EXAMPLE: &[u8] = include_bytes!("testdata/example_config.json");
const EXAMPLE_YAML: &[u8] = include_bytes!("testdata/example_config.yaml");

// =============================================================================
// Test Helpers
// =============================================================================

/// Serves every object as "<bucket>/<key>"
struct EchoBlobStore;

#[async_trait]
impl BlobStore for EchoBlobStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ResourceError> {
        Ok(format!("{}/{}", bucket, key).into_bytes())
    }
}

fn loader() -> ResourceLoader {
    ResourceLoader::new().with_blob_store(Arc::new(EchoBlobStore))
}

// =============================================================================
// Example snapshot
// =============================================================================

#[tokio::test]
async fn test_load_example_config() {
    let config = Config::load(EXAMPLE, &loader()).await.expect("example config should load");

    assert_eq!(config.name, "fooproject_nonprod");
    assert_eq!(config.version, "1.0");
    assert!(config.is_normalised());

    let developer = config.resolve_role("developer").unwrap();
    assert_eq!(developer.credentials, vec!["ssh-jumpbox", "kube", "aws-ro"]);
    assert_eq!(developer.valid_for_seconds, 7200);

    let deployment = config.resolve_role("deployment").unwrap();
    assert!(deployment.wrap_key().unwrap().starts_with("arn:aws:kms:"));

    match &config.resolve_credential_backend("ssh-all").unwrap().backend {
        CredentialBackend::SshCa(ssh) => {
            assert_eq!(ssh.ca_key, "my-bucket/sshca.key");
            assert_eq!(ssh.principals, vec!["$idpuser", "core", "ec2-user"]);
        }
        other => panic!("unexpected backend {:?}", other),
    }

    match &config.resolve_idp("nonprod").unwrap().provider {
        IdpProvider::Saml(saml) => {
            assert!(saml.certificate.starts_with("-----BEGIN CERTIFICATE-----\n"));
            assert_eq!(saml.audience, "keymaster-saml");
        }
        other => panic!("unexpected idp {:?}", other),
    }

    let policy = config.resolve_policy("deploy_with_approval").unwrap();
    assert!(policy.requires_workflow());
    assert_eq!(policy.approver_roles.get("adfs_role_approver"), Some(&1));
    assert!(!config.resolve_policy("no_workflow").unwrap().requires_workflow());
}

#[tokio::test]
async fn test_load_without_blob_store_fails_whole_load() {
    let result = Config::load(EXAMPLE, &ResourceLoader::new()).await;
    assert!(matches!(result, Err(ConfigError::Resource { .. })));
}

#[tokio::test]
async fn test_bad_backend_block_aborts_load() {
    let mut document: serde_json::Value = serde_json::from_slice(EXAMPLE).unwrap();
    document["credentials"][3]["config"] = serde_json::json!({ "target_role": 42 });

    let result = Config::load(document.to_string().as_bytes(), &loader()).await;
    match result {
        Err(ConfigError::BackendParse { name, kind, .. }) => {
            assert_eq!(name, "aws-ro");
            assert_eq!(kind, "iam_assume_role");
        }
        other => panic!("Expected BackendParse, got {:?}", other),
    }
}

#[test]
fn test_yaml_example_matches_json() {
    let from_yaml = Config::from_slice(EXAMPLE_YAML).unwrap();
    let from_json = Config::from_slice(EXAMPLE).unwrap();
    assert_eq!(from_yaml, from_json);
    assert_eq!(from_yaml.version, "1.0");
}

#[test]
fn test_yaml_example_round_trip() {
    let config = Config::from_yaml(EXAMPLE_YAML).unwrap();
    let reloaded = Config::from_json(&config.to_json().unwrap()).unwrap();
    assert_eq!(config, reloaded);
}

#[tokio::test]
async fn test_load_yaml_example_config() {
    let config = Config::load(EXAMPLE_YAML, &loader()).await.expect("yaml example should load");
    assert!(config.is_normalised());
    assert_eq!(config.resolve_role("deployment").unwrap().valid_for_seconds, 3600);
    match &config.resolve_credential_backend("kube").unwrap().backend {
        CredentialBackend::Kubernetes(kube) => assert_eq!(kube.ca_key, "my-bucket/kubeca.key"),
        other => panic!("unexpected backend {:?}", other),
    }
}

#[test]
fn test_yaml_bad_backend_block_reports_backend() {
    let yaml = b"name: x\ncredentials:\n  - name: ssh\n    type: ssh_ca\n    config:\n      target_role: Admin\n";
    match Config::from_slice(yaml) {
        Err(ConfigError::BackendParse { name, kind, .. }) => {
            assert_eq!(name, "ssh");
            assert_eq!(kind, "ssh_ca");
        }
        other => panic!("Expected BackendParse, got {:?}", other),
    }
}

#[test]
fn test_malformed_yaml_is_parse_error() {
    assert!(matches!(Config::from_slice(b"name: [unterminated"), Err(ConfigError::Parse(_))));
}

#[test]
fn test_example_round_trip() {
    let config = Config::from_json(EXAMPLE).unwrap();
    let reloaded = Config::from_json(&config.to_json().unwrap()).unwrap();
    assert_eq!(config, reloaded);
}

// =============================================================================
// Round-trip property
// =============================================================================

fn backend_for(index: usize, name: &str) -> CredentialBackend {
    match index % 4 {
        0 => CredentialBackend::IamAssumeRole(AssumeRoleConfig {
            target_role: format!("arn:aws:iam::123456789012:role/{}", name),
        }),
        1 => CredentialBackend::SshCa(SshCaConfig {
            ca_key: format!("s3://bucket/{}.key", name),
            principals: vec!["$idpuser".into(), name.to_string()],
        }),
        2 => CredentialBackend::Kubernetes(KubernetesCaConfig {
            ca_key: "file:///etc/kube/ca.key".into(),
            ca_cert: "file:///etc/kube/ca.crt".into(),
            groups: vec![name.to_string()],
        }),
        _ => CredentialBackend::IamUser(IamUserConfig {}),
    }
}

fn build_config(
    backends: &BTreeSet<String>,
    policies: &BTreeSet<String>,
    roles: &BTreeSet<String>,
    validity: u64,
) -> Config {
    let backend_names: Vec<&String> = backends.iter().collect();
    let policy_names: Vec<&String> = policies.iter().collect();

    let mut config = Config::default();
    config.name = "generated".into();
    config.version = "1.0".into();

    config.idp = vec![IdpConfig {
        name: "generated-idp".into(),
        provider: IdpProvider::Jwt(JwtIdpConfig {
            verification_key: "data://c2VjcmV0".into(),
            algorithm: "HS256".into(),
            audience: "keymaster".into(),
            username_claim: "sub".into(),
            groups_claim: "groups".into(),
        }),
    }];

    config.workflow = WorkflowConfig {
        base_url: "https://workflow.example/".into(),
        policies: policy_names
            .iter()
            .enumerate()
            .map(|(i, name)| WorkflowPolicyConfig {
                name: name.to_string(),
                idp_name: "generated-idp".into(),
                requester_can_approve: i % 2 == 0,
                approver_roles: if i % 2 == 0 {
                    BTreeMap::new()
                } else {
                    BTreeMap::from([(format!("{}_approver", name), 1)])
                },
                ..Default::default()
            })
            .collect(),
    };

    config.credentials = backend_names
        .iter()
        .enumerate()
        .map(|(i, name)| CredentialsConfig {
            name: name.to_string(),
            backend: backend_for(i, name),
        })
        .collect();

    config.roles = roles
        .iter()
        .enumerate()
        .map(|(i, name)| RoleConfig {
            name: name.clone(),
            credentials: backend_names
                .iter()
                .skip(i % backend_names.len())
                .map(|b| b.to_string())
                .collect(),
            workflow: policy_names[i % policy_names.len()].to_string(),
            valid_for_seconds: validity + i as u64,
            credential_delivery: Default::default(),
        })
        .collect();

    config
}

proptest! {
    /// Every name resolves to the same entry after a JSON round trip
    #[test]
    fn prop_snapshot_round_trip_resolves_identically(
        backends in prop::collection::btree_set("[a-z]{3,8}", 1..6),
        policies in prop::collection::btree_set("[a-z]{3,8}", 1..4),
        roles in prop::collection::btree_set("[a-z]{3,8}", 1..5),
        validity in 1..86_400u64,
    ) {
        let original = build_config(&backends, &policies, &roles, validity);
        prop_assert!(original.validate().is_ok());

        let reloaded = Config::from_json(&original.to_json().unwrap()).unwrap();
        prop_assert!(reloaded.validate().is_ok());

        for role in &original.roles {
            prop_assert_eq!(reloaded.resolve_role(&role.name).unwrap(), role);
        }
        for backend in &original.credentials {
            prop_assert_eq!(reloaded.resolve_credential_backend(&backend.name).unwrap(), backend);
        }
        for policy in &original.workflow.policies {
            prop_assert_eq!(reloaded.resolve_policy(&policy.name).unwrap(), policy);
        }
    }
}
