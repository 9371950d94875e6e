//! Optional encryption at rest for any storage backend.
//!
//! Values are sealed with AES-256-GCM before they reach the inner backend.
//! The key is supplied by the deployer; where it lives is outside this crate.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::backend::StorageBackend;
use crate::errors::{Result, StorageFault};

const AAD_VERSION: &str = "v1";
const NONCE_LEN: usize = 12;

/// AES-256 key (32 bytes)
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; 32];
        getrandom::fill(&mut key)
            .map_err(|e| StorageFault::unavailable(format!("No randomness available: {e}")))?;
        Ok(Self { key })
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.key.into())
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Encrypted value as stored by the inner backend
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedBlob {
    /// Base64url-encoded nonce (12 bytes)
    nonce: String,
    /// Base64url-encoded ciphertext + tag
    ciphertext: String,
    /// Additional authenticated data version
    aad_version: String,
}

fn aad(version: &str, key: &str) -> String {
    format!("sk-store|{version}|{key}")
}

fn seal(secret: &EncryptionKey, key: &str, plaintext: &str) -> Result<String> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let aad = aad(AAD_VERSION, key);

    let ciphertext = secret
        .cipher()
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: aad.as_bytes(),
            },
        )
        .map_err(|e| StorageFault::unavailable(format!("Encryption failed: {e}")))?;

    let blob = EncryptedBlob {
        nonce: URL_SAFE_NO_PAD.encode(nonce),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        aad_version: AAD_VERSION.to_string(),
    };

    serde_json::to_string(&blob)
        .map_err(|e| StorageFault::unavailable(format!("Failed to serialize encrypted blob: {e}")))
}

fn open(secret: &EncryptionKey, key: &str, stored: &str) -> Result<String> {
    let blob: EncryptedBlob = serde_json::from_str(stored)
        .map_err(|e| StorageFault::corrupted(format!("Invalid encrypted data for {key}: {e}")))?;

    let nonce_bytes = URL_SAFE_NO_PAD
        .decode(&blob.nonce)
        .map_err(|e| StorageFault::corrupted(format!("Invalid nonce for {key}: {e}")))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(StorageFault::corrupted(format!("Invalid nonce length for {key}")));
    }

    let ciphertext = URL_SAFE_NO_PAD
        .decode(&blob.ciphertext)
        .map_err(|e| StorageFault::corrupted(format!("Invalid ciphertext for {key}: {e}")))?;

    let aad = aad(&blob.aad_version, key);
    let plaintext = secret
        .cipher()
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| StorageFault::corrupted(format!("Value for {key} failed authentication")))?;

    String::from_utf8(plaintext)
        .map_err(|_| StorageFault::corrupted(format!("Value for {key} is not UTF-8")))
}

/// Backend wrapper that encrypts every value it stores
#[derive(Debug)]
pub struct EncryptedBackend<B> {
    inner: B,
    key: EncryptionKey,
}

impl<B: StorageBackend> EncryptedBackend<B> {
    pub fn new(inner: B, key: EncryptionKey) -> Self {
        Self { inner, key }
    }
}

#[async_trait::async_trait]
impl<B: StorageBackend> StorageBackend for EncryptedBackend<B> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.inner.get(key).await? {
            Some(stored) if !stored.is_empty() => open(&self.key, key, &stored).map(Some),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let sealed = seal(&self.key, key, value)?;
        self.inner.set(key, &sealed).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }
}
