//! Tenant key resolution, creation, and validation.
//!
//! # Storage
//!
//! Keys live in TenantKeyMap objects, `{ "<tenant_id>": "<base64 key>" }`.
//! [`KeyLayout::Shared`] keeps every tenant in one object; [`KeyLayout::PerTenant`]
//! gives each tenant its own object so creating one tenant's key never
//! rewrites another's.
//!
//! # Security invariants
//!
//! - A stored key whose decoded length differs from the configured length is
//!   rejected outright. It is never padded, truncated, or replaced.
//! - [`KeyRegistry::get_key`] is a pure read; only `ensure_key` and
//!   `create_key` write.
//! - Key bytes are never logged.

pub mod key;
mod locks;

pub use key::TenantKey;

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::ErrorKind;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{Secret, SecretData, SecretStore, StoreError};
use locks::PathLocks;

/// Upper bound on check-and-set retries inside one `ensure_key` / `create_key`.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Where tenant keys are stored inside the mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLayout {
    /// One TenantKeyMap object at `secret`, shared by all tenants.
    Shared { secret: String },
    /// One single-entry object per tenant at `<prefix>/<tenant_id>`.
    PerTenant { prefix: String },
}

impl KeyLayout {
    /// Secret path holding `tenant_id`'s entry.
    pub fn path_for(&self, tenant_id: &str) -> String {
        match self {
            KeyLayout::Shared { secret } => secret.trim_matches('/').to_owned(),
            KeyLayout::PerTenant { prefix } => {
                format!("{}/{}", prefix.trim_matches('/'), tenant_id)
            }
        }
    }
}

/// Errors produced by the key registry.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The tenant id cannot be used as a secret path segment.
    #[error("invalid tenant id")]
    InvalidTenantId,

    /// No key entry exists for the tenant.
    #[error("no key for tenant {tenant_id}")]
    KeyNotFound { tenant_id: String },

    /// The entry decodes to the wrong number of bytes.
    #[error("key for tenant {tenant_id} has invalid length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        tenant_id: String,
        expected: usize,
        actual: usize,
    },

    /// The entry is not a base64 string at all.
    #[error("key for tenant {tenant_id} is not a base64 string")]
    MalformedKey { tenant_id: String },

    /// The secret store failed while accessing `path`.
    #[error("secret store failure at {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

impl KeyError {
    /// Flat classification for logging and retry decisions.
    ///
    /// A malformed entry counts as an invalid-length key: both are the same
    /// terminal, fail-closed state.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyError::InvalidTenantId => ErrorKind::InvalidTenantId,
            KeyError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            KeyError::InvalidKeyLength { .. } | KeyError::MalformedKey { .. } => {
                ErrorKind::InvalidKeyLength
            }
            KeyError::Store { source, .. } => source.kind(),
        }
    }

    fn store(path: &str, source: StoreError) -> Self {
        KeyError::Store {
            path: path.to_owned(),
            source,
        }
    }
}

/// Resolves tenant ids to validated key material.
///
/// Holds no key material between calls; every lookup reads the store.
pub struct KeyRegistry {
    store: Arc<dyn SecretStore>,
    layout: KeyLayout,
    key_len: usize,
    locks: PathLocks,
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("layout", &self.layout)
            .field("key_len", &self.key_len)
            .field("store_version", &self.store.version())
            .finish()
    }
}

impl KeyRegistry {
    /// Create a registry over `store`.
    ///
    /// `key_len` is the exact decoded length every stored key must have.
    pub fn new(store: Arc<dyn SecretStore>, layout: KeyLayout, key_len: usize) -> Self {
        Self {
            store,
            layout,
            key_len,
            locks: PathLocks::new(),
        }
    }

    /// Look up the tenant's key. Never creates one.
    ///
    /// # Errors
    ///
    /// - [`KeyError::KeyNotFound`] if the tenant has no entry (or its object is absent).
    /// - [`KeyError::InvalidKeyLength`] / [`KeyError::MalformedKey`] if the entry is unusable.
    /// - [`KeyError::Store`] for any other store failure.
    pub async fn get_key(
        &self,
        tenant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TenantKey, KeyError> {
        validate_tenant_id(tenant_id)?;
        let path = self.layout.path_for(tenant_id);
        match self.read(&path, cancel).await? {
            Some(secret) => self.decode_entry(tenant_id, &secret.data),
            None => Err(KeyError::KeyNotFound {
                tenant_id: tenant_id.to_owned(),
            }),
        }
    }

    /// Return the tenant's key, creating it on first use.
    ///
    /// Concurrent calls for the same tenant all return the same key: creation
    /// is serialised per secret path in-process and guarded by check-and-set
    /// against other processes. A writer that loses the race adopts the
    /// winner's key.
    ///
    /// # Errors
    ///
    /// Any [`get_key`](Self::get_key) error other than `KeyNotFound`, unchanged.
    pub async fn ensure_key(
        &self,
        tenant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TenantKey, KeyError> {
        match self.get_key(tenant_id, cancel).await {
            Err(KeyError::KeyNotFound { .. }) => self.write_entry(tenant_id, false, cancel).await,
            other => other,
        }
    }

    /// Generate a fresh key for the tenant and store it, replacing any
    /// existing entry for that tenant.
    ///
    /// Other tenants' entries in the same object are preserved: the write is
    /// check-and-set against the version that was read and is retried on
    /// conflict.
    pub async fn create_key(
        &self,
        tenant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TenantKey, KeyError> {
        validate_tenant_id(tenant_id)?;
        self.write_entry(tenant_id, true, cancel).await
    }

    /// Read-merge-write of the tenant's entry.
    ///
    /// With `replace == false` an existing valid entry wins and is returned
    /// unchanged; an existing invalid entry is an error, never overwritten.
    async fn write_entry(
        &self,
        tenant_id: &str,
        replace: bool,
        cancel: &CancellationToken,
    ) -> Result<TenantKey, KeyError> {
        let path = self.layout.path_for(tenant_id);
        let _guard = self.locks.acquire(&path).await;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.read(&path, cancel).await?;

            if !replace {
                if let Some(secret) = &current {
                    match self.decode_entry(tenant_id, &secret.data) {
                        Ok(existing) => {
                            debug!(tenant_id, "tenant key already present");
                            return Ok(existing);
                        }
                        Err(KeyError::KeyNotFound { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            let (mut data, cas) = match current {
                Some(Secret { data, version }) => (data, version.unwrap_or(0)),
                None => (SecretData::new(), 0),
            };
            let key = TenantKey::generate(self.key_len);
            data.insert(tenant_id.to_owned(), Value::String(key.to_base64()));

            match self.store.put(&path, data, Some(cas), cancel).await {
                Ok(version) => {
                    info!(tenant_id, path = %path, ?version, "tenant key stored");
                    return Ok(key);
                }
                Err(StoreError::CasConflict { .. }) => {
                    debug!(tenant_id, attempt, "check-and-set lost; re-reading");
                }
                Err(e) => return Err(KeyError::store(&path, e)),
            }
        }

        warn!(tenant_id, path = %path, "giving up after repeated check-and-set conflicts");
        Err(KeyError::store(
            &path,
            StoreError::CasConflict { path: path.clone() },
        ))
    }

    /// Read an object, mapping "nothing stored" to `None`.
    async fn read(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Secret>, KeyError> {
        match self.store.get(path, cancel).await {
            Ok(secret) => Ok(Some(secret)),
            Err(StoreError::SecretMissing { .. }) => Ok(None),
            Err(e) => Err(KeyError::store(path, e)),
        }
    }

    /// Extract and validate the tenant's entry from a TenantKeyMap object.
    fn decode_entry(&self, tenant_id: &str, data: &SecretData) -> Result<TenantKey, KeyError> {
        let encoded = match data.get(tenant_id) {
            None => {
                return Err(KeyError::KeyNotFound {
                    tenant_id: tenant_id.to_owned(),
                })
            }
            Some(Value::String(s)) => s,
            Some(_) => {
                return Err(KeyError::MalformedKey {
                    tenant_id: tenant_id.to_owned(),
                })
            }
        };

        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| KeyError::MalformedKey {
                tenant_id: tenant_id.to_owned(),
            })?;
        let key = TenantKey::from_vec(bytes);
        if key.len() != self.key_len {
            return Err(KeyError::InvalidKeyLength {
                tenant_id: tenant_id.to_owned(),
                expected: self.key_len,
                actual: key.len(),
            });
        }
        Ok(key)
    }
}

/// Tenant ids become secret path segments and object keys.
///
/// Only URL-unreserved characters (`A-Z a-z 0-9 - . _ ~`) are accepted, so an
/// id is sent to the backend literally: nothing in it can end the path early,
/// be decoded into a separator, or address a sibling object.
fn validate_tenant_id(tenant_id: &str) -> Result<(), KeyError> {
    let usable = !matches!(tenant_id, "" | "." | "..")
        && tenant_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'));
    if usable {
        Ok(())
    } else {
        Err(KeyError::InvalidTenantId)
    }
}
