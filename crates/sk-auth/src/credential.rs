use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sk_store::{DurableStore, StorageFault, WriteSession};
use tracing::{debug, info, instrument, warn};

use crate::config::StorageKeys;

/// Bearer credential issued to one subject
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub subject_id: String,
    pub saved_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        subject_id: impl Into<String>,
        saved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            subject_id: subject_id.into(),
            saved_at,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &format_args!("[{} bytes]", self.access_token.len()))
            .field("refresh_token", &format_args!("[{} bytes]", self.refresh_token.len()))
            .field("subject_id", &self.subject_id)
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

/// Process-wide view of the persisted credential
///
/// Reads go through the durable store; when the store cannot produce a
/// complete record the last credential saved by this process is used.
#[derive(Debug)]
pub struct CredentialCache {
    store: Arc<DurableStore>,
    keys: StorageKeys,
    backup: Mutex<Option<Credential>>,
}

impl CredentialCache {
    pub fn new(store: Arc<DurableStore>, keys: StorageKeys) -> Self {
        Self {
            store,
            keys,
            backup: Mutex::new(None),
        }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Current credential, if any
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self) -> Option<Credential> {
        match self.read_stored().await {
            Ok(Some(credential)) => return Some(credential),
            Ok(None) => {}
            Err(fault) => warn!("Failed to read stored credential: {}", fault),
        }

        let backup = self.backup();
        if backup.is_some() {
            debug!("Using in-memory credential backup");
        }
        backup
    }

    /// Persist all four entries as one unit
    ///
    /// The timestamp is written last. If any write fails the previous record
    /// is put back and the fault returned.
    pub async fn save(&self, credential: &Credential) -> Result<(), StorageFault> {
        self.save_if(credential, || true).await.map(|_| ())
    }

    /// Like [`save`](Self::save), skipped when `current` returns false
    ///
    /// `current` runs while the store's write gate is held, so nothing can
    /// clear or replace the record between the check and the write.
    #[instrument(skip(self, credential, current), fields(subject = %credential.subject_id))]
    pub async fn save_if(
        &self,
        credential: &Credential,
        current: impl FnOnce() -> bool,
    ) -> Result<bool, StorageFault> {
        let keys = &self.keys;
        {
            let session = self.store.write().await;
            if !current() {
                info!("Credential superseded, not saving");
                return Ok(false);
            }

            let previous = snapshot(&session, keys).await;
            if let Err(fault) = write_record(&session, keys, credential).await {
                warn!("Save failed, restoring previous record: {}", fault);
                write_back(&session, keys, previous).await;
                return Err(fault);
            }

            match session.get(&keys.access_token).await {
                Ok(Some(stored)) if stored == credential.access_token => {}
                Ok(_) => warn!("Stored access token does not match the saved one"),
                Err(fault) => warn!("Could not re-read access token after save: {}", fault),
            }
        }

        *self.backup.lock().unwrap_or_else(|e| e.into_inner()) = Some(credential.clone());
        info!(
            "Saved credential (access token length {})",
            credential.access_token.len()
        );
        Ok(true)
    }

    /// Forget the credential everywhere; safe to call repeatedly
    pub async fn clear(&self) {
        self.clear_if(|| true).await;
    }

    /// Like [`clear`](Self::clear), skipped when `current` returns false
    #[instrument(skip(self, current))]
    pub async fn clear_if(&self, current: impl FnOnce() -> bool) -> bool {
        {
            let session = self.store.write().await;
            if !current() {
                info!("Credential superseded, not clearing");
                return false;
            }
            for key in self.keys.all() {
                session.remove(key).await;
            }
        }
        *self.backup.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!("Cleared credential");
        true
    }

    fn backup(&self) -> Option<Credential> {
        self.backup.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn read_stored(&self) -> Result<Option<Credential>, StorageFault> {
        let keys = &self.keys;
        let session = self.store.read().await;

        let Some(access_token) = session.get(&keys.access_token).await? else {
            if session.get_once(&keys.refresh_token).await?.is_some() {
                warn!("Refresh token stored without an access token");
            }
            return Ok(None);
        };

        let refresh_token = session.get(&keys.refresh_token).await?;
        let subject_id = session.get(&keys.subject_id).await?;
        // Written last by `save`, so its absence marks an interrupted write
        let saved_at = session.get(&keys.saved_at).await?;
        let (Some(refresh_token), Some(subject_id), Some(saved_at)) =
            (refresh_token, subject_id, saved_at)
        else {
            warn!("Stored credential is incomplete");
            return Ok(None);
        };

        Ok(Some(Credential {
            access_token,
            refresh_token,
            subject_id,
            saved_at: parse_saved_at(&saved_at),
        }))
    }
}

type Snapshot = Vec<(String, Result<Option<String>, StorageFault>)>;

async fn snapshot(session: &WriteSession<'_>, keys: &StorageKeys) -> Snapshot {
    let mut previous = Vec::with_capacity(4);
    for key in keys.all() {
        previous.push((key.to_string(), session.get_once(key).await));
    }
    previous
}

async fn write_record(
    session: &WriteSession<'_>,
    keys: &StorageKeys,
    credential: &Credential,
) -> Result<(), StorageFault> {
    session.remove(&keys.saved_at).await;
    session.put(&keys.access_token, &credential.access_token).await?;
    session.put(&keys.refresh_token, &credential.refresh_token).await?;
    session.put(&keys.subject_id, &credential.subject_id).await?;
    session
        .put(&keys.saved_at, &credential.saved_at.timestamp_millis().to_string())
        .await
}

/// Put a snapshot back, leaving the timestamp absent unless every other key
/// was restored
async fn write_back(session: &WriteSession<'_>, keys: &StorageKeys, previous: Snapshot) {
    let mut intact = true;
    for (key, value) in previous {
        let value = match value {
            Ok(value) => value,
            Err(fault) => {
                warn!("Previous value of {} unknown: {}", key, fault);
                intact = false;
                continue;
            }
        };
        if key == keys.saved_at && !intact {
            session.remove(&key).await;
            continue;
        }
        if session.get_once(&key).await.ok() == Some(value.clone()) {
            continue;
        }

        let restored = match &value {
            Some(value) => session.put(&key, value).await,
            None => {
                session.remove(&key).await;
                Ok(())
            }
        };
        if let Err(fault) = restored {
            warn!("Could not restore {}: {}", key, fault);
            intact = false;
        }
    }
}

fn parse_saved_at(raw: &str) -> DateTime<Utc> {
    match raw
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
    {
        Some(saved_at) => saved_at,
        None => {
            warn!("Invalid save timestamp {:?}, using epoch", raw);
            DateTime::UNIX_EPOCH
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sk_store::{MemoryBackend, StorageBackend, StorageFaultKind, StoragePolicy};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory backend whose operations can be switched to fail
    #[derive(Default)]
    struct SwitchableBackend {
        inner: MemoryBackend,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        fail_writes_to: Mutex<Option<String>>,
    }

    #[async_trait]
    impl StorageBackend for SwitchableBackend {
        async fn get(&self, key: &str) -> sk_store::Result<Option<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StorageFault::unavailable("read failed"));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> sk_store::Result<()> {
            let rejected = self.fail_writes_to.lock().unwrap().as_deref() == Some(key);
            if rejected || self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageFault::new(StorageFaultKind::QuotaExceeded, "quota"));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> sk_store::Result<()> {
            self.inner.remove(key).await
        }
    }

    fn cache_over(backend: Arc<SwitchableBackend>) -> CredentialCache {
        let store = DurableStore::with_policy(backend, StoragePolicy::default());
        CredentialCache::new(Arc::new(store), StorageKeys::default())
    }

    fn credential(access: &str) -> Credential {
        Credential::new(
            access,
            "R1",
            "U1",
            DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_then_get() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());

        cache.save(&credential("A1")).await.unwrap();

        assert_eq!(
            backend.inner.get("session_saved_at").await.unwrap().as_deref(),
            Some("1700000000123")
        );

        // A second cache over the same backend sees the persisted record
        let fresh = cache_over(backend);
        assert_eq!(fresh.get().await, Some(credential("A1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_store_has_no_credential() {
        let cache = cache_over(Arc::new(SwitchableBackend::default()));
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_fault_falls_back_to_memory() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());
        cache.save(&credential("A1")).await.unwrap();

        backend.fail_reads.store(true, Ordering::SeqCst);
        assert_eq!(cache.get().await, Some(credential("A1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_record_falls_back_to_memory() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());
        cache.save(&credential("A1")).await.unwrap();

        backend.inner.remove("session_subject_id").await.unwrap();
        assert_eq!(cache.get().await, Some(credential("A1")));

        // Without a backup a partial record reads as absent
        assert_eq!(cache_over(backend).get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_timestamp_reads_as_epoch() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());
        cache.save(&credential("A1")).await.unwrap();
        backend.inner.set("session_saved_at", "yesterday").await.unwrap();

        let stored = cache_over(backend).get().await.unwrap();
        assert_eq!(stored.saved_at, DateTime::UNIX_EPOCH);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_keeps_previous_backup() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());
        cache.save(&credential("A1")).await.unwrap();

        backend.fail_writes.store(true, Ordering::SeqCst);
        let err = cache.save(&credential("A2")).await.unwrap_err();
        assert_eq!(err.kind, StorageFaultKind::QuotaExceeded);

        backend.fail_reads.store(true, Ordering::SeqCst);
        assert_eq!(cache.get().await, Some(credential("A1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_restores_previous_record() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());
        cache.save(&credential("A1")).await.unwrap();

        *backend.fail_writes_to.lock().unwrap() = Some("session_refresh_token".into());
        let replacement = Credential::new("B1", "S1", "U2", DateTime::UNIX_EPOCH);
        let err = cache.save(&replacement).await.unwrap_err();
        assert_eq!(err.kind, StorageFaultKind::QuotaExceeded);

        assert_eq!(cache.get().await, Some(credential("A1")));
        assert_eq!(cache_over(backend).get().await, Some(credential("A1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_save_leaves_nothing_behind() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());

        *backend.fail_writes_to.lock().unwrap() = Some("session_subject_id".into());
        assert!(cache.save(&credential("A1")).await.is_err());

        assert!(backend.inner.keys().is_empty());
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_timestamp_marks_interrupted_write() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());
        cache.save(&credential("A1")).await.unwrap();

        // Tokens from a newer write without the stamp that completes it
        backend.inner.set("session_access_token", "B1").await.unwrap();
        backend.inner.remove("session_saved_at").await.unwrap();

        assert_eq!(cache.get().await, Some(credential("A1")));
        assert_eq!(cache_over(backend).get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_save_and_clear_are_skipped() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());

        assert!(!cache.save_if(&credential("A1"), || false).await.unwrap());
        assert!(backend.inner.keys().is_empty());

        cache.save(&credential("A1")).await.unwrap();
        assert!(!cache.clear_if(|| false).await);
        assert_eq!(cache_over(backend).get().await, Some(credential("A1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_is_idempotent() {
        let backend = Arc::new(SwitchableBackend::default());
        let cache = cache_over(backend.clone());
        cache.save(&credential("A1")).await.unwrap();

        cache.clear().await;
        cache.clear().await;

        assert!(backend.inner.keys().is_empty());
        assert_eq!(cache.get().await, None);
    }

    #[test]
    fn test_debug_hides_tokens() {
        let rendered = format!("{:?}", credential("secret-access"));
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("R1"));
        assert!(rendered.contains("U1"));
    }
}
