//! Cryptography module
//!
//! This module provides the session token decryption used by the frontend
//! credentials exchange.

pub mod session;

// Re-export commonly used types
pub use session::{SessionCipherFactory, SessionDecryptor, SessionKey};
