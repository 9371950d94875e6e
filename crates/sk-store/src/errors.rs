use std::io;

use thiserror::Error;

/// Category of a storage failure
///
/// Quota and permission faults are persistent: retrying will not help, the
/// user has to act. The other kinds are treated as transient by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageFaultKind {
    /// Device or quota is full
    QuotaExceeded,
    /// The runtime refused access to the storage area
    PermissionDenied,
    /// A value exists but cannot be decoded
    Corrupted,
    /// Anything else reported by the backend
    Unavailable,
}

impl StorageFaultKind {
    /// Whether the fault needs user action rather than a retry
    pub fn is_persistent(self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::PermissionDenied)
    }
}

/// Error reported by a storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StorageFault {
    pub kind: StorageFaultKind,
    pub message: String,
}

impl StorageFault {
    pub fn new(kind: StorageFaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StorageFaultKind::Unavailable, message)
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::new(StorageFaultKind::Corrupted, message)
    }

    /// Classify a backend error message the way device runtimes word them
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();

        let kind = if lower.contains("quota") || lower.contains("no space") {
            StorageFaultKind::QuotaExceeded
        } else if lower.contains("permission") || lower.contains("access denied") {
            StorageFaultKind::PermissionDenied
        } else {
            StorageFaultKind::Unavailable
        };

        Self { kind, message }
    }

    /// Short advice for the user, when there is something they can do
    pub fn advice(&self) -> Option<&'static str> {
        match self.kind {
            StorageFaultKind::QuotaExceeded => {
                Some("Storage is full. Free up some space and sign in again.")
            }
            StorageFaultKind::PermissionDenied => {
                Some("Storage access is disabled. Allow it in settings and try again.")
            }
            StorageFaultKind::Corrupted | StorageFaultKind::Unavailable => None,
        }
    }
}

impl From<io::Error> for StorageFault {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                StorageFaultKind::PermissionDenied
            }
            io::ErrorKind::StorageFull => StorageFaultKind::QuotaExceeded,
            io::ErrorKind::InvalidData => StorageFaultKind::Corrupted,
            _ => StorageFaultKind::Unavailable,
        };

        Self {
            kind,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageFault>;
