//! AES-GCM encryption and decryption of individual field values.
//!
//! **Nonces are random per call.** GCM nonce reuse under one key breaks both
//! confidentiality and authentication, so every [`seal`] draws 96 fresh bits
//! from the OS CSPRNG. Never derive the nonce from the plaintext or a counter
//! shared across processes.

use aes_gcm::{
    aead::{
        consts::U12,
        generic_array::GenericArray,
        rand_core::RngCore,
        Aead, KeyInit, OsRng,
    },
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::ErrorKind;
use thiserror::Error;

/// Byte length of an AES-GCM nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag appended by [`seal`].
pub const TAG_LEN: usize = 16;

/// Default key length: AES-256.
pub const DEFAULT_KEY_LEN: usize = 32;

/// Key lengths accepted by [`seal`] and [`open`].
pub const SUPPORTED_KEY_LENS: [usize; 3] = [16, 24, 32];

type Aes192Gcm = AesGcm<Aes192, U12>;

/// A parsed, encrypted field value.
///
/// The string representation is `base64(nonce || ciphertext+tag)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Raw nonce bytes.
    pub nonce: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Encode this value to its wire representation.
    pub fn to_base64(&self) -> String {
        let mut buf = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.ciphertext);
        STANDARD.encode(buf)
    }

    /// Parse a wire-format string back into an [`EncryptedPayload`].
    ///
    /// Only the nonce length is checked here; a body too short to hold a tag
    /// is left for [`open`] to reject.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidFormat`] if `s` is not standard base64 or
    /// decodes to fewer than [`NONCE_LEN`] bytes.
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let raw = STANDARD.decode(s).map_err(|_| CryptoError::InvalidFormat)?;
        if raw.len() < NONCE_LEN {
            return Err(CryptoError::InvalidFormat);
        }
        let (nonce_bytes, body) = raw.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce,
            ciphertext: body.to_vec(),
        })
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key is not one of [`SUPPORTED_KEY_LENS`].
    #[error("invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    /// AES-GCM refused to seal the plaintext (exceeds the GCM length limit).
    #[error("aead seal failed")]
    SealFailure,

    /// The payload is not valid wire format.
    #[error("invalid ciphertext format")]
    InvalidFormat,

    /// Tag verification failed: tampered data or wrong key.
    #[error("authentication failed")]
    AuthenticationFailed,
}

impl CryptoError {
    /// Flat classification for logging and retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::InvalidKeyLength(_) => ErrorKind::InvalidKeyLength,
            CryptoError::SealFailure | CryptoError::InvalidFormat => ErrorKind::CiphertextFormat,
            CryptoError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
        }
    }
}

/// AES-GCM keyed for one of the supported key sizes.
enum FieldCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl FieldCipher {
    fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let bad_len = |_| CryptoError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(Self::Aes128).map_err(bad_len),
            24 => Aes192Gcm::new_from_slice(key).map(Self::Aes192).map_err(bad_len),
            32 => Aes256Gcm::new_from_slice(key).map(Self::Aes256).map_err(bad_len),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    fn encrypt(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = GenericArray::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.encrypt(nonce, plaintext),
            Self::Aes192(c) => c.encrypt(nonce, plaintext),
            Self::Aes256(c) => c.encrypt(nonce, plaintext),
        }
    }

    fn decrypt(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = GenericArray::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.decrypt(nonce, ciphertext),
            Self::Aes192(c) => c.decrypt(nonce, ciphertext),
            Self::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
    }
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `key` is not a supported size.
/// Returns [`CryptoError::SealFailure`] if the plaintext exceeds the GCM limit.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<EncryptedPayload, CryptoError> {
    let cipher = FieldCipher::new(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::SealFailure)?;

    Ok(EncryptedPayload { nonce, ciphertext })
}

/// Decrypt an [`EncryptedPayload`] back to plaintext bytes.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `key` is not a supported size.
/// Returns [`CryptoError::AuthenticationFailed`] if the tag does not verify.
pub fn open(payload: &EncryptedPayload, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = FieldCipher::new(key)?;
    cipher
        .decrypt(&payload.nonce, &payload.ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
