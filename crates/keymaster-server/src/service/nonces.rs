//! Pending workflow nonces
//!
//! `workflow_start` records an issuing nonce together with the idp nonce it
//! was minted with; `workflow_auth` takes it back out. Taking removes the
//! entry, so an issuing nonce authorizes at most one issuance. Entries that
//! are never redeemed expire after the store's TTL.

use async_trait::async_trait;
use moka::future::Cache;
use std::time::{Duration, Instant};
use tracing::debug;

/// Error type for nonce store operations
#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("Nonce store error: {0}")]
    Store(String),
}

/// Storage for issuing nonce -> idp nonce bindings
///
/// Implementations must be thread-safe and `take` must be atomic: two
/// concurrent takes of the same nonce return it at most once.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Record a freshly minted pair
    async fn insert(&self, issuing_nonce: String, idp_nonce: String) -> Result<(), NonceError>;

    /// Remove and return the idp nonce bound to an issuing nonce
    async fn take(&self, issuing_nonce: &str) -> Result<Option<String>, NonceError>;
}

/// Default time a started workflow stays redeemable
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(900);

const MAX_PENDING: u64 = 100_000;

/// In-memory nonce store backed by a TTL cache
pub struct MemoryNonceStore {
    pending: Cache<String, (String, Instant)>,
    ttl: Duration,
}

impl MemoryNonceStore {
    /// Create a store whose entries expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(MAX_PENDING)
                .build(),
            ttl,
        }
    }
}

impl Default for MemoryNonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_TTL)
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn insert(&self, issuing_nonce: String, idp_nonce: String) -> Result<(), NonceError> {
        debug!("Recording pending workflow nonce");
        self.pending.insert(issuing_nonce, (idp_nonce, Instant::now())).await;
        Ok(())
    }

    async fn take(&self, issuing_nonce: &str) -> Result<Option<String>, NonceError> {
        // Removal may surface an entry the cache has not evicted yet
        Ok(self
            .pending
            .remove(issuing_nonce)
            .await
            .filter(|(_, minted)| minted.elapsed() < self.ttl)
            .map(|(idp_nonce, _)| idp_nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = MemoryNonceStore::default();
        store.insert("issuing".into(), "idp".into()).await.unwrap();

        assert_eq!(store.take("issuing").await.unwrap(), Some("idp".to_string()));
        assert_eq!(store.take("issuing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_nonce() {
        let store = MemoryNonceStore::default();
        assert_eq!(store.take("never-issued").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryNonceStore::new(Duration::from_millis(50));
        store.insert("issuing".into(), "idp".into()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.take("issuing").await.unwrap(), None);
    }
}
