//! Configuration for the encryption core.
//!
//! Values are read from environment variables. A missing credential or an
//! unsupported key length fails at startup rather than on the first request.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::crypto::SUPPORTED_KEY_LENS;
use crate::registry::KeyLayout;

/// Which [`KeyLayout`] the registry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLayoutKind {
    /// One map secret holding every tenant's key.
    Shared,
    /// One secret object per tenant.
    #[default]
    PerTenant,
}

/// Validated core configuration.
#[derive(Clone, Deserialize)]
pub struct CryptConfig {
    /// Base URL of the secret backend. **Required.**
    pub vault_addr: String,

    /// Backend access token. **Required.**
    pub vault_token: String,

    /// KV engine mount holding tenant keys.
    #[serde(default = "default_vault_mount")]
    pub vault_mount: String,

    /// Key byte length: 16, 24, or 32.
    #[serde(default = "default_key_len")]
    pub key_len: usize,

    /// Secret name used by the shared layout.
    #[serde(default = "default_key_map_secret")]
    pub key_map_secret: String,

    #[serde(default)]
    pub key_layout: KeyLayoutKind,

    /// Path prefix used by the per-tenant layout.
    #[serde(default = "default_key_path_prefix")]
    pub key_path_prefix: String,

    /// Per-request timeout against the backend, in seconds.
    #[serde(default = "default_vault_timeout")]
    pub vault_timeout_secs: u64,
}

fn default_vault_mount() -> String {
    "secret".into()
}
fn default_key_len() -> usize {
    crate::crypto::DEFAULT_KEY_LEN
}
fn default_key_map_secret() -> String {
    "institute-keys".into()
}
fn default_key_path_prefix() -> String {
    "keys".into()
}
fn default_vault_timeout() -> u64 {
    10
}

impl CryptConfig {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or invalid.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: CryptConfig = cfg
            .try_deserialize()
            .context("failed to deserialise encryption configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// The key layout these settings select.
    pub fn layout(&self) -> KeyLayout {
        match self.key_layout {
            KeyLayoutKind::Shared => KeyLayout::Shared {
                secret: self.key_map_secret.clone(),
            },
            KeyLayoutKind::PerTenant => KeyLayout::PerTenant {
                prefix: self.key_path_prefix.clone(),
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.vault_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.vault_addr, "VAULT_ADDR")?;
        ensure_non_empty(&self.vault_token, "VAULT_TOKEN")?;
        ensure_non_empty(&self.vault_mount, "VAULT_MOUNT")?;
        ensure_path(&self.vault_mount, "VAULT_MOUNT")?;

        match self.key_layout {
            KeyLayoutKind::Shared => {
                ensure_non_empty(&self.key_map_secret, "KEY_MAP_SECRET")?;
                ensure_path(&self.key_map_secret, "KEY_MAP_SECRET")?;
            }
            KeyLayoutKind::PerTenant => {
                ensure_non_empty(&self.key_path_prefix, "KEY_PATH_PREFIX")?;
                ensure_path(&self.key_path_prefix, "KEY_PATH_PREFIX")?;
            }
        }

        if !SUPPORTED_KEY_LENS.contains(&self.key_len) {
            anyhow::bail!(
                "KEY_LEN must be one of {SUPPORTED_KEY_LENS:?}, got {}",
                self.key_len
            );
        }
        if self.vault_timeout_secs == 0 {
            anyhow::bail!("VAULT_TIMEOUT_SECS must be > 0");
        }
        Ok(())
    }
}

impl std::fmt::Debug for CryptConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptConfig")
            .field("vault_addr", &self.vault_addr)
            .field("vault_token", &"[REDACTED]")
            .field("vault_mount", &self.vault_mount)
            .field("key_len", &self.key_len)
            .field("key_map_secret", &self.key_map_secret)
            .field("key_layout", &self.key_layout)
            .field("key_path_prefix", &self.key_path_prefix)
            .field("vault_timeout_secs", &self.vault_timeout_secs)
            .finish()
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

/// Backend paths are sent verbatim: URL-unreserved characters and `/` only.
fn ensure_path(value: &str, name: &str) -> Result<()> {
    let literal = value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'/'));
    if !literal {
        anyhow::bail!("{name} may only contain letters, digits, '-', '.', '_', '~' and '/'");
    }
    Ok(())
}
