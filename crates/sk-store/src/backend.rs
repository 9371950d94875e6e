use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{Result, StorageFault};

/// Key/value primitives offered by the device or runtime storage
///
/// Implementations may be slow and may not make a write visible to the next
/// read straight away. `DurableStore` compensates for that; backends only
/// report what they see.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a value. `Ok(None)` means "not found".
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

#[async_trait::async_trait]
impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }
}

/// In-memory backend for testing and simple use cases
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.values
            .read()
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> StorageFault {
    StorageFault::unavailable("Lock poisoned")
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let backend = MemoryBackend::new();

        assert_eq!(backend.get("k").await.unwrap(), None);
        backend.set("k", "v").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));

        backend.remove("k").await.unwrap();
        backend.remove("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_values() {
        let backend = MemoryBackend::new();
        let shared: Arc<dyn StorageBackend> = Arc::new(backend.clone());

        shared.set("token", "abc").await.unwrap();
        assert_eq!(backend.keys(), vec!["token".to_string()]);
    }
}
