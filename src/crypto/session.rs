//! Session token decryption
//!
//! The client authenticates by sending a session token encrypted under the
//! server's session key, together with a per-session initialization vector.
//! Decryption is exposed through the [`SessionDecryptor`] trait so the
//! credential handler never depends on a concrete cipher.
//!
//! Every connection owns its own decryptor (see [`SessionCipherFactory`]):
//! the IV is connection state, and sharing one configured cipher between
//! connections would let one client's IV corrupt another's decryption.
//!
//! The shipped cipher is AES-256-GCM with the credentials IV as the 96-bit
//! nonce.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::CryptoError;

/// Session key length in bytes (AES-256)
pub const SESSION_KEY_LEN: usize = 32;

/// IV length in bytes (GCM nonce)
pub const IV_LEN: usize = 12;

/// Stateful session token decryption capability
pub trait SessionDecryptor: Send {
    /// Configure the IV used by subsequent decryptions
    fn set_iv(&mut self, iv: &[u8]) -> Result<(), CryptoError>;

    /// Decrypt an encrypted session token with the configured IV
    fn decrypt_token(&mut self, encrypted: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Server-wide session key
#[derive(Clone)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex encoded key
    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(value.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; SESSION_KEY_LEN] = raw.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                SESSION_KEY_LEN,
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log key material
        f.debug_struct("SessionKey")
            .field("len", &SESSION_KEY_LEN)
            .finish()
    }
}

/// AES-256-GCM session token decryptor, one per connection
pub struct AesGcmSessionDecryptor {
    cipher: Aes256Gcm,
    iv: Option<[u8; IV_LEN]>,
}

impl AesGcmSessionDecryptor {
    /// Create a decryptor with no IV configured
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.as_bytes().into()),
            iv: None,
        }
    }

    /// Whether an IV has been configured
    pub fn has_iv(&self) -> bool {
        self.iv.is_some()
    }
}

impl SessionDecryptor for AesGcmSessionDecryptor {
    fn set_iv(&mut self, iv: &[u8]) -> Result<(), CryptoError> {
        match <[u8; IV_LEN]>::try_from(iv) {
            Ok(iv) => {
                self.iv = Some(iv);
                Ok(())
            }
            Err(_) => {
                // A rejected IV must not leave the previous one in place
                self.iv = None;
                Err(CryptoError::InvalidIvLength {
                    expected: IV_LEN,
                    actual: iv.len(),
                })
            }
        }
    }

    fn decrypt_token(&mut self, encrypted: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = self.iv.ok_or(CryptoError::MissingIv)?;
        self.cipher
            .decrypt(Nonce::from_slice(&iv), encrypted)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// Encrypt a session token the way the client does
///
/// Used by tooling and tests to produce valid credentials.
pub fn seal_token(key: &SessionKey, iv: &[u8], token: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidIvLength {
            expected: IV_LEN,
            actual: iv.len(),
        });
    }
    Aes256Gcm::new(key.as_bytes().into())
        .encrypt(Nonce::from_slice(iv), token)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Creates an independent decryptor for every accepted connection
#[derive(Debug, Clone)]
pub struct SessionCipherFactory {
    key: Arc<SessionKey>,
}

impl SessionCipherFactory {
    /// Create a factory around the server session key
    pub fn new(key: SessionKey) -> Self {
        Self { key: Arc::new(key) }
    }

    /// Create a fresh decryptor for a new connection
    pub fn create(&self) -> Box<dyn SessionDecryptor> {
        Box::new(AesGcmSessionDecryptor::new(&self.key))
    }
}
