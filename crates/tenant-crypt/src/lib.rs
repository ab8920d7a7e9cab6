//! Per-tenant envelope encryption.
//!
//! Every tenant ("institute") owns one symmetric key kept in a remote
//! key-value secret store. Sensitive fields are sealed with AES-GCM under that
//! key before they are persisted.
//!
//! Layering, leaf first:
//!
//! - [`store`]: the [`SecretStore`] capability (`get` / `put`), implemented by
//!   the Vault KV client ([`store::VaultClient`], v1 and v2 mounts) and by
//!   [`store::MemoryStore`].
//! - [`registry`]: [`KeyRegistry`] resolves, creates, and validates tenant keys.
//! - [`crypto`]: AES-GCM primitives and the [`crypto::EncryptedPayload`] wire format.
//! - [`service`]: [`CipherService`], the `encrypt` / `decrypt` / `ensure_key`
//!   surface the rest of the platform calls.
//!
//! Every I/O-bound call takes a [`CancellationToken`]; cancellation surfaces as
//! [`common::ErrorKind::Cancelled`].

pub mod config;
pub mod crypto;
pub mod registry;
pub mod service;
pub mod store;

pub use config::CryptConfig;
pub use registry::{KeyError, KeyLayout, KeyRegistry, TenantKey};
pub use service::{CipherError, CipherService};
pub use store::{KvVersion, Secret, SecretData, SecretStore, StoreError};
pub use tokio_util::sync::CancellationToken;
