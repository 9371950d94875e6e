use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::fs;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::errors::{Result, StorageFault};

/// File-based storage backend
///
/// Every key is stored in its own file, so one value can be written or
/// lost without touching the others.
///
/// # Directory Structure
/// ```text
/// ~/.config/session-keeper/
/// ├── lock                   # Advisory lock file
/// └── values/
///     ├── session_access_token
///     └── session_refresh_token
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    values_dir: PathBuf,
    lock_file: PathBuf,
}

impl FileBackend {
    /// Create a new file backend rooted at `storage_dir`
    pub async fn new(storage_dir: impl AsRef<Path>) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        let values_dir = storage_dir.join("values");
        let lock_file = storage_dir.join("lock");

        fs::create_dir_all(&values_dir).await?;

        // Set secure permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            fs::set_permissions(&storage_dir, perms.clone()).await?;
            fs::set_permissions(&values_dir, perms).await?;
        }

        Ok(Self {
            values_dir,
            lock_file,
        })
    }

    /// Get default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("", "", "session-keeper")
            .ok_or_else(|| StorageFault::unavailable("Could not determine config directory"))?;

        Ok(project_dirs.config_dir().to_path_buf())
    }

    fn value_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageFault::unavailable(format!("Invalid storage key: {key:?}")));
        }
        Ok(self.values_dir.join(key))
    }

    /// Take the advisory lock shared with other processes using this directory
    async fn acquire_lock(&self) -> Result<std::fs::File> {
        let path = self.lock_file.clone();
        tokio::task::spawn_blocking(move || -> Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| StorageFault::unavailable(format!("Lock task failed: {e}")))?
    }
}

#[async_trait::async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.value_path(key)?;

        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.value_path(key)?;
        let _lock = self.acquire_lock().await?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.values_dir.join(format!("{key}.tmp"));
        fs::write(&temp_path, value).await?;

        // Sync to disk
        let file = fs::File::open(&temp_path).await?;
        file.sync_all().await?;

        // Set secure permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        fs::rename(&temp_path, &path).await?;
        debug!("Stored {} ({} bytes)", key, value.len());

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.value_path(key)?;
        let _lock = self.acquire_lock().await?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
