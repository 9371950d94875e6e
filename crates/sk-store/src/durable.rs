use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::backend::StorageBackend;
use crate::backoff::{Step, retry};
use crate::config::StoragePolicy;
use crate::errors::Result;
use crate::gate::{ReadGuard, RwGate, WriteGuard};

/// Persistence gate over an unreliable backend
///
/// Reads retry "not found" with a linear backoff, writes are read back to
/// confirm they became visible, and removals never fail. All access goes
/// through a reader/writer gate so a multi-key save is never observed half
/// done by a reader of this store.
pub struct DurableStore {
    backend: Arc<dyn StorageBackend>,
    gate: RwGate,
    policy: StoragePolicy,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("gate", &self.gate)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DurableStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self::with_policy(Arc::new(backend), StoragePolicy::default())
    }

    pub fn with_policy(backend: Arc<dyn StorageBackend>, policy: StoragePolicy) -> Self {
        Self {
            backend,
            gate: RwGate::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    /// Shared access for reading several keys consistently
    pub async fn read(&self) -> ReadSession<'_> {
        ReadSession {
            store: self,
            _guard: self.gate.read().await,
        }
    }

    /// Exclusive access for writing several keys as one unit
    pub async fn write(&self) -> WriteSession<'_> {
        WriteSession {
            store: self,
            _guard: self.gate.write().await,
        }
    }

    /// Read one key, absorbing visibility races
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read().await.get(key).await
    }

    /// Write one key and confirm it can be read back
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.write().await.put(key, value).await
    }

    /// Remove one key; failures are logged only
    pub async fn remove(&self, key: &str) {
        self.write().await.remove(key).await;
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_with_retry(&self, key: &str) -> Result<Option<String>> {
        let attempts = self.policy.read_retries + 1;

        retry(
            attempts,
            |n| self.policy.delay(n),
            |attempt| async move {
                match self.backend.get(key).await {
                    Ok(Some(value)) if !value.is_empty() => {
                        if attempt > 1 {
                            debug!("Value for {} visible on attempt {}", key, attempt);
                        }
                        Step::Done(Ok(Some(value)))
                    }
                    Ok(_) => {
                        if attempt < attempts {
                            debug!(
                                "Value for {} not found, retrying ({}/{})",
                                key, attempt, attempts
                            );
                        } else {
                            debug!("Value for {} not found after {} attempts", key, attempts);
                        }
                        Step::Again(Ok(None))
                    }
                    Err(fault) => {
                        warn!("Failed to read {}: {}", key, fault);
                        Step::Done(Err(fault))
                    }
                }
            },
        )
        .await
    }

    async fn get_once(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .backend
            .get(key)
            .await?
            .filter(|value| !value.is_empty()))
    }

    #[instrument(skip(self, value), fields(len = value.len()), level = "debug")]
    async fn put_verified(&self, key: &str, value: &str) -> Result<()> {
        self.backend.set(key, value).await.inspect_err(|fault| {
            error!("Failed to write {}: {}", key, fault);
        })?;

        let verified = retry(
            self.policy.verify_attempts,
            |n| self.policy.delay(n),
            |_| async move {
                match self.backend.get(key).await {
                    Ok(Some(stored)) if stored == value => Step::Done(true),
                    _ => Step::Again(false),
                }
            },
        )
        .await;

        if !verified {
            // The write was accepted; a lagging read must not fail the save
            warn!(
                "Write to {} not visible after {} read-backs, continuing",
                key, self.policy.verify_attempts
            );
        }

        Ok(())
    }

    async fn remove_best_effort(&self, key: &str) {
        if let Err(fault) = self.backend.remove(key).await {
            warn!("Failed to remove {}: {}", key, fault);
        }
    }
}

/// Shared access to a `DurableStore`, released on drop
#[must_use]
#[derive(Debug)]
pub struct ReadSession<'a> {
    store: &'a DurableStore,
    _guard: ReadGuard<'a>,
}

impl ReadSession<'_> {
    /// Read with "not found" retries
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.store.get_with_retry(key).await
    }

    /// Single read without retries
    pub async fn get_once(&self, key: &str) -> Result<Option<String>> {
        self.store.get_once(key).await
    }
}

/// Exclusive access to a `DurableStore`, released on drop
#[must_use]
#[derive(Debug)]
pub struct WriteSession<'a> {
    store: &'a DurableStore,
    _guard: WriteGuard<'a>,
}

impl WriteSession<'_> {
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.store.put_verified(key, value).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.store.get_with_retry(key).await
    }

    pub async fn get_once(&self, key: &str) -> Result<Option<String>> {
        self.store.get_once(key).await
    }

    pub async fn remove(&self, key: &str) {
        self.store.remove_best_effort(key).await;
    }
}
