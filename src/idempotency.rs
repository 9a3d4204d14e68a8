//! Request-level idempotency guard.
//!
//! Callers tag a submission with an idempotency key; the guard rejects a
//! repeat of a previously seen key until its TTL expires. Expired entries
//! are lazily evicted on lookup. The guard is the single place this check
//! happens; the orchestrator itself never deduplicates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

/// A stored idempotency entry
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    /// The caller-supplied key
    pub key: String,

    /// When the key stops blocking repeats
    pub expires_at: DateTime<Utc>,
}

/// Key/value store with TTL semantics, implemented by the caller
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Fetch a record by key
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Store a record under the key
    async fn set(&self, key: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Remove a record
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Errors from the idempotency guard
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The key was seen before and has not expired yet
    #[error("Duplicate request for idempotency key '{0}'")]
    Duplicate(String),

    #[error("Idempotency store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Rejects repeat submissions of the same logical request
pub struct IdempotencyGuard<S> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: IdempotencyStore> IdempotencyGuard<S> {
    /// Create a guard with the given key TTL
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Register a key, rejecting it if it was seen within the TTL window.
    ///
    /// A live record means the request is a duplicate. An expired record is
    /// deleted on the spot and the key re-registered.
    pub async fn register(&self, key: &str) -> Result<(), IdempotencyError> {
        match self.store.get(key).await.map_err(IdempotencyError::Store)? {
            Some(record) if record.expires_at > Utc::now() => {
                debug!(key, "Rejecting duplicate request");
                return Err(IdempotencyError::Duplicate(key.to_string()));
            }
            Some(_) => {
                // Lazy eviction of the expired entry
                self.store.delete(key).await.map_err(IdempotencyError::Store)?;
            }
            None => {}
        }

        let expires_at = Utc::now() + self.ttl;
        self.store
            .set(key, expires_at)
            .await
            .map_err(IdempotencyError::Store)?;

        debug!(key, %expires_at, "Idempotency key registered");
        Ok(())
    }
}

/// Map-backed idempotency store for tests and embedding
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(key)
            .map(|expires_at| IdempotencyRecord {
                key: key.to_string(),
                expires_at: *expires_at,
            }))
    }

    async fn set(&self, key: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), expires_at);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(ttl: Duration) -> IdempotencyGuard<InMemoryIdempotencyStore> {
        IdempotencyGuard::new(Arc::new(InMemoryIdempotencyStore::new()), ttl)
    }

    #[tokio::test]
    async fn test_first_registration_accepted() {
        let guard = guard(Duration::from_secs(60));
        assert!(guard.register("req-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_repeat_within_ttl_rejected() {
        let guard = guard(Duration::from_secs(60));

        guard.register("req-1").await.unwrap();
        let repeat = guard.register("req-1").await;

        assert!(matches!(repeat, Err(IdempotencyError::Duplicate(k)) if k == "req-1"));
    }

    #[tokio::test]
    async fn test_distinct_keys_independent() {
        let guard = guard(Duration::from_secs(60));

        guard.register("req-1").await.unwrap();
        assert!(guard.register("req-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_key_reaccepted() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let guard = IdempotencyGuard::new(store.clone(), Duration::from_secs(60));

        // Plant an already-expired record
        store
            .set("req-1", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert!(guard.register("req-1").await.is_ok());

        // The re-registration installed a fresh TTL
        let record = store.get("req-1").await.unwrap().unwrap();
        assert!(record.expires_at > Utc::now());
    }
}
