//! Secret store access: one `{get, put}` capability over KV v1 and v2 backends.
//!
//! # Module invariants
//!
//! - **No crypto dependencies.** This module never sees decoded key material,
//!   only the JSON objects the backend stores.
//! - `put` replaces the whole object at a path. Read-merge-write is the caller's job.
//! - A cancelled call commits nothing locally; the HTTP implementation checks
//!   the token before a request leaves the process.

pub mod memory;
pub mod mounts;
pub mod vault;

pub use memory::MemoryStore;
pub use mounts::MountCache;
pub use vault::{KvMount, VaultClient};

use std::future::Future;

use async_trait::async_trait;
use common::ErrorKind;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The object stored at one secret path.
pub type SecretData = serde_json::Map<String, serde_json::Value>;

/// A secret object together with its backend version metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Secret {
    /// The stored key/value object.
    pub data: SecretData,
    /// Current object version. Always `None` on KV v1 mounts.
    pub version: Option<u64>,
}

/// Wire-protocol generation of a KV mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvVersion {
    /// Flat objects at `<mount>/<path>`, no versioning.
    V1,
    /// Objects nested under `data` at `<mount>/data/<path>`, versioned, CAS-capable.
    V2,
}

impl KvVersion {
    /// Decide the protocol from mount metadata.
    ///
    /// Only a `kv` engine whose `version` option is exactly `"2"` is V2.
    /// Anything else, including a missing option, falls back to V1.
    pub fn from_mount(engine_type: Option<&str>, version_option: Option<&str>) -> Self {
        match (engine_type, version_option) {
            (Some("kv"), Some("2")) => KvVersion::V2,
            _ => KvVersion::V1,
        }
    }
}

/// Errors produced by the secret store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport failure, timeout, rejected credential, or an unusable backend reply.
    #[error("secret backend unavailable: {0}")]
    Connection(String),

    /// The secret engine mount does not exist.
    #[error("secret mount not found: {mount}")]
    MountNotFound { mount: String },

    /// No object is stored at the path.
    #[error("no secret stored at {path}")]
    SecretMissing { path: String },

    /// A check-and-set write was rejected because the object changed.
    #[error("check-and-set rejected at {path}")]
    CasConflict { path: String },

    /// The caller cancelled the request.
    #[error("secret store request cancelled")]
    Cancelled,
}

impl StoreError {
    /// Flat classification for logging and retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connection(_) => ErrorKind::Connection,
            StoreError::MountNotFound { .. } => ErrorKind::MountNotFound,
            StoreError::SecretMissing { .. } => ErrorKind::SecretMissing,
            StoreError::CasConflict { .. } => ErrorKind::CasConflict,
            StoreError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Capability every secret backend exposes to the key registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Protocol generation of the backing mount.
    fn version(&self) -> KvVersion;

    /// Read the object at `path`.
    ///
    /// # Errors
    ///
    /// [`StoreError::SecretMissing`] if nothing is stored there,
    /// [`StoreError::Connection`] on transport failure,
    /// [`StoreError::Cancelled`] if `cancel` fires first.
    async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Secret, StoreError>;

    /// Replace the object at `path` with `data`.
    ///
    /// `cas` is honoured on V2 mounts only: `Some(0)` writes only if the object
    /// is absent, `Some(n)` only if its current version is `n`. Returns the new
    /// version when the backend reports one.
    ///
    /// # Errors
    ///
    /// [`StoreError::CasConflict`] if the check-and-set is rejected, plus the
    /// transport errors of [`SecretStore::get`].
    async fn put(
        &self,
        path: &str,
        data: SecretData,
        cas: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, StoreError>;
}

/// Run `fut` unless `cancel` fires first.
///
/// An already-cancelled token short-circuits before `fut` is polled, so no
/// request is ever started on its behalf.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        res = fut => res,
    }
}
