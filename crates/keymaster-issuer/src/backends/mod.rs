//! Credential issuers, one per backend kind

pub mod assume_role;
pub mod kube_ca;
pub mod mock;
pub mod ssh_ca;

pub use assume_role::{AssumeRoleFactory, AssumeRoleIssuer, AssumeRoleRequest, StsClient, StsCredentials};
pub use kube_ca::{KubernetesCaFactory, KubernetesCaIssuer};
pub use mock::{CallLog, MockFactory, MockIssuer};
pub use ssh_ca::{SshCaFactory, SshCaIssuer};
