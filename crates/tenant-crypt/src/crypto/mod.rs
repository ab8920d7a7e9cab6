//! AES-GCM field encryption primitives.
//!
//! This module is intentionally free of secret-store and tenant dependencies.
//! It provides the low-level seal/open operations used by [`crate::service`].
//!
//! # Ciphertext format
//!
//! ```text
//! base64( nonce(12) || ciphertext || tag(16) )     standard alphabet, padded
//! ```
//!
//! The payload carries no key identifier. The key size (16, 24, or 32 bytes)
//! selects AES-128, AES-192, or AES-256.

pub mod cipher;

pub use cipher::{
    open, seal, CryptoError, EncryptedPayload, DEFAULT_KEY_LEN, NONCE_LEN, SUPPORTED_KEY_LENS,
    TAG_LEN,
};
