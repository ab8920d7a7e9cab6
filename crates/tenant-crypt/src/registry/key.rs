//! [`TenantKey`]: owned key material for one tenant.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::{Zeroizing, ZeroizeOnDrop};

/// Decoded symmetric key bytes for one tenant.
///
/// Only ever produced by the registry, already checked against the configured
/// length. The buffer is zeroed on drop and `Debug` prints nothing of it.
#[derive(Clone)]
pub struct TenantKey(Zeroizing<Box<[u8]>>);

impl TenantKey {
    /// Draw `len` bytes from the OS CSPRNG.
    pub(crate) fn generate(len: usize) -> Self {
        let mut buf = Zeroizing::new(vec![0u8; len].into_boxed_slice());
        OsRng.fill_bytes(&mut buf[..]);
        Self(buf)
    }

    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes.into_boxed_slice()))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return `true` for a zero-length key (never produced by the registry).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encoding used for the stored map entry.
    pub(crate) fn to_base64(&self) -> String {
        STANDARD.encode(self.as_bytes())
    }
}

impl ZeroizeOnDrop for TenantKey {}

impl std::fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TenantKey([REDACTED])")
    }
}
