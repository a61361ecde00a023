//! Issuer registry - maps backend kinds to the factories that build issuers

use keymaster_core::{BackendKind, CredentialsConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::backends::{KubernetesCaFactory, SshCaFactory};
use crate::error::BackendError;
use crate::issuer::CredentialIssuer;

/// Builds a [`CredentialIssuer`] for one configured backend
///
/// A factory is registered per [`BackendKind`]. Supporting a new kind means
/// adding a `CredentialBackend` variant and registering a factory for it.
pub trait IssuerFactory: Send + Sync {
    /// Get the backend kind this factory builds issuers for
    fn kind(&self) -> BackendKind;

    /// Build an issuer from a backend config of this factory's kind
    fn build(&self, config: &CredentialsConfig) -> Result<Arc<dyn CredentialIssuer>, BackendError>;

    /// Get a description of this factory (for logging)
    fn description(&self) -> &str {
        "issuer factory"
    }
}

/// Registry of issuer factories keyed by backend kind
pub struct IssuerRegistry {
    factories: HashMap<BackendKind, Arc<dyn IssuerFactory>>,
}

impl IssuerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the backends that need no external service (SSH CA, cluster CA)
    pub fn with_standard_backends() -> Self {
        IssuerRegistryBuilder::new()
            .with_factory(SshCaFactory::new())
            .with_factory(KubernetesCaFactory::new())
            .build()
    }

    /// Register a factory, replacing any previous one for the same kind
    pub fn register_factory<F: IssuerFactory + 'static>(&mut self, factory: F) {
        let kind = factory.kind();
        info!(
            backend_kind = %kind,
            description = factory.description(),
            "Registered issuer factory"
        );
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Get the factory for a backend kind
    pub fn get_factory(&self, kind: BackendKind) -> Option<Arc<dyn IssuerFactory>> {
        self.factories.get(&kind).cloned()
    }

    /// Check if a factory is registered for a backend kind
    pub fn has_factory(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// List all registered backend kinds
    pub fn registered_kinds(&self) -> Vec<BackendKind> {
        self.factories.keys().copied().collect()
    }
}

impl Default for IssuerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating an IssuerRegistry with factories
pub struct IssuerRegistryBuilder {
    registry: IssuerRegistry,
}

impl IssuerRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: IssuerRegistry::new(),
        }
    }

    /// Add an issuer factory
    pub fn with_factory<F: IssuerFactory + 'static>(mut self, factory: F) -> Self {
        self.registry.register_factory(factory);
        self
    }

    pub fn build(self) -> IssuerRegistry {
        self.registry
    }
}

impl Default for IssuerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
