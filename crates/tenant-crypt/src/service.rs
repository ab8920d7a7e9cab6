//! [`CipherService`]: the encrypt / decrypt / ensure-key surface.
//!
//! The data-access layer calls [`CipherService::encrypt`] immediately before
//! persisting a sensitive field and [`CipherService::decrypt`] immediately
//! after reading one. Tenant provisioning calls [`CipherService::ensure_key`]
//! once when a tenant is created.
//!
//! # Logging
//!
//! Failures are logged with the tenant id and error kind only. Decrypt
//! failures go to the `tenant_crypt::audit` target so they can be routed to
//! a durable sink independently of diagnostic logs.

use std::sync::Arc;

use common::ErrorKind;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crypto::{open, seal, CryptoError, EncryptedPayload};
use crate::registry::{KeyError, KeyRegistry};

/// Errors produced by [`CipherService`], annotated with the tenant.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The tenant's key could not be resolved.
    #[error("key resolution failed for tenant {tenant_id}: {source}")]
    Key {
        tenant_id: String,
        #[source]
        source: KeyError,
    },

    /// Sealing or opening the payload failed.
    #[error("cipher operation failed for tenant {tenant_id}: {source}")]
    Crypto {
        tenant_id: String,
        #[source]
        source: CryptoError,
    },
}

impl CipherError {
    /// Flat classification for logging and retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CipherError::Key { source, .. } => source.kind(),
            CipherError::Crypto { source, .. } => source.kind(),
        }
    }

    /// Tenant the failed call was made for.
    pub fn tenant_id(&self) -> &str {
        match self {
            CipherError::Key { tenant_id, .. } | CipherError::Crypto { tenant_id, .. } => tenant_id,
        }
    }

    fn key(tenant_id: &str, source: KeyError) -> Self {
        CipherError::Key {
            tenant_id: tenant_id.to_owned(),
            source,
        }
    }

    fn crypto(tenant_id: &str, source: CryptoError) -> Self {
        CipherError::Crypto {
            tenant_id: tenant_id.to_owned(),
            source,
        }
    }
}

/// Authenticated encryption of field values under per-tenant keys.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone, Debug)]
pub struct CipherService {
    registry: Arc<KeyRegistry>,
}

impl CipherService {
    /// Wrap a key registry.
    pub fn new(registry: KeyRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Make sure the tenant has a key, creating one if absent.
    ///
    /// Returns no key material; provisioning only needs to know it exists.
    pub async fn ensure_key(
        &self,
        tenant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CipherError> {
        self.registry
            .ensure_key(tenant_id, cancel)
            .await
            .map(drop)
            .map_err(|e| CipherError::key(tenant_id, e))
            .inspect_err(|e| warn!(tenant_id, kind = %e.kind(), "ensure key failed"))
    }

    /// Encrypt a string field. Empty input yields empty output without
    /// touching the key store.
    pub async fn encrypt(
        &self,
        tenant_id: &str,
        plaintext: &str,
        cancel: &CancellationToken,
    ) -> Result<String, CipherError> {
        self.encrypt_bytes(tenant_id, plaintext.as_bytes(), cancel)
            .await
    }

    /// Decrypt a string field produced by [`encrypt`](Self::encrypt).
    ///
    /// Never creates a key: a tenant without one fails `KeyNotFound`.
    ///
    /// # Errors
    ///
    /// `CiphertextFormat` for bad base64, short input, or non-UTF-8 plaintext;
    /// `AuthenticationFailed` for a tampered payload or the wrong tenant's key.
    pub async fn decrypt(
        &self,
        tenant_id: &str,
        ciphertext: &str,
        cancel: &CancellationToken,
    ) -> Result<String, CipherError> {
        let bytes = self.decrypt_bytes(tenant_id, ciphertext, cancel).await?;
        String::from_utf8(bytes).map_err(|_| {
            let err = CipherError::crypto(tenant_id, CryptoError::InvalidFormat);
            audit_failure(&err);
            err
        })
    }

    /// Encrypt arbitrary bytes. Empty input yields an empty string.
    pub async fn encrypt_bytes(
        &self,
        tenant_id: &str,
        plaintext: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let key = self
            .registry
            .ensure_key(tenant_id, cancel)
            .await
            .map_err(|e| CipherError::key(tenant_id, e))
            .inspect_err(|e| warn!(tenant_id, kind = %e.kind(), "encrypt failed"))?;

        let payload = seal(plaintext, key.as_bytes())
            .map_err(|e| CipherError::crypto(tenant_id, e))
            .inspect_err(|e| warn!(tenant_id, kind = %e.kind(), "encrypt failed"))?;

        debug!(tenant_id, "field encrypted");
        Ok(payload.to_base64())
    }

    /// Decrypt bytes produced by [`encrypt_bytes`](Self::encrypt_bytes).
    /// Empty input yields empty output.
    pub async fn decrypt_bytes(
        &self,
        tenant_id: &str,
        ciphertext: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, CipherError> {
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }

        let key = self
            .registry
            .get_key(tenant_id, cancel)
            .await
            .map_err(|e| CipherError::key(tenant_id, e))
            .inspect_err(audit_failure)?;

        let payload = EncryptedPayload::from_base64(ciphertext)
            .map_err(|e| CipherError::crypto(tenant_id, e))
            .inspect_err(audit_failure)?;

        open(&payload, key.as_bytes())
            .map_err(|e| CipherError::crypto(tenant_id, e))
            .inspect_err(audit_failure)
    }
}

fn audit_failure(err: &CipherError) {
    warn!(
        target: "tenant_crypt::audit",
        tenant_id = err.tenant_id(),
        kind = %err.kind(),
        "decrypt failed"
    );
}
