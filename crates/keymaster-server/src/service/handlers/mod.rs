//! API request handlers

pub mod discovery;
pub mod workflow;

pub use discovery::{discovery, get_config};
pub use workflow::{workflow_auth, workflow_start};

use keymaster_core::Config;
use keymaster_issuer::{IssuerRegistry, KeyWrapper};
use std::sync::Arc;

use super::assertions::{AssertionError, AssertionVerifier};
use super::nonces::{MemoryNonceStore, NonceStore};

/// Application state shared across handlers
pub struct AppState {
    /// Loaded and normalised config snapshot
    pub config: Arc<Config>,
    /// Issuer factories available to roles
    pub registry: IssuerRegistry,
    /// Delivery wrapping for roles that set `kms_wrap_with`
    pub wrapper: Option<Arc<dyn KeyWrapper>>,
    /// Pending workflow nonces
    pub nonces: Arc<dyn NonceStore>,
    /// Assertion verification keyed by idp name
    pub verifier: AssertionVerifier,
}

impl AppState {
    /// Build state for a snapshot with an in-memory nonce store
    pub fn new(config: Config, registry: IssuerRegistry) -> Result<Self, AssertionError> {
        let verifier = AssertionVerifier::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            registry,
            wrapper: None,
            nonces: Arc::new(MemoryNonceStore::default()),
            verifier,
        })
    }

    pub fn with_wrapper(mut self, wrapper: Arc<dyn KeyWrapper>) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    pub fn with_nonce_store(mut self, nonces: Arc<dyn NonceStore>) -> Self {
        self.nonces = nonces;
        self
    }
}
