//! Durable key/value storage over unreliable backends
//!
//! Device storage on mobile and web runtimes is asynchronous, occasionally
//! reports "not found" for a value that was just written, and may be shared
//! by several module instances. This crate wraps such a backend in a
//! [`DurableStore`]:
//!
//! - reads retry "not found" with a linear backoff (100ms, 200ms, 300ms)
//! - writes are read back to confirm they became visible
//! - removals are best effort and never fail the caller
//! - a reader/writer gate keeps multi-key writes from being seen half done
//!
//! # Example
//!
//! ```
//! use sk_store::{DurableStore, MemoryBackend};
//!
//! # async fn example() -> sk_store::Result<()> {
//! let store = DurableStore::new(MemoryBackend::new());
//!
//! store.put("session_subject_id", "u-42").await?;
//! assert_eq!(store.get("session_subject_id").await?.as_deref(), Some("u-42"));
//!
//! store.remove("session_subject_id").await;
//! # Ok(())
//! # }
//! # tokio_test::block_on(example()).unwrap();
//! ```
//!
//! # Backends
//!
//! - [`MemoryBackend`] for tests and ephemeral sessions
//! - [`FileBackend`] for one-file-per-key storage in the platform config dir
//! - `EncryptedBackend` (feature `encryption`) wraps either with AES-256-GCM

pub mod backend;
pub mod backoff;
pub mod config;
#[cfg(feature = "encryption")]
pub mod crypto;
pub mod durable;
pub mod errors;
pub mod file_store;
pub mod gate;

pub use backend::{MemoryBackend, StorageBackend};
pub use backoff::{Step, retry};
pub use config::StoragePolicy;
#[cfg(feature = "encryption")]
pub use crypto::{EncryptedBackend, EncryptionKey};
pub use durable::{DurableStore, ReadSession, WriteSession};
pub use errors::{Result, StorageFault, StorageFaultKind};
pub use file_store::FileBackend;
pub use gate::RwGate;
