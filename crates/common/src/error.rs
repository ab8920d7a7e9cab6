//! Common error types shared across crates.
//!
//! [`ErrorKind`] is the flat classification every core error reports. It is
//! what gets logged and what callers branch on for retry decisions.
//! [`ServiceError`] is the opaque form handed to external callers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of every failure the encryption core can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Secret backend unreachable, timed out, or rejected the credential.
    Connection,
    /// The secret engine mount does not exist.
    MountNotFound,
    /// The secret object at a path does not exist.
    SecretMissing,
    /// A check-and-set write lost against a concurrent writer.
    CasConflict,
    /// The tenant has no key entry.
    KeyNotFound,
    /// The tenant's key entry is present but malformed.
    InvalidKeyLength,
    /// The tenant identifier cannot be used as a secret path segment.
    InvalidTenantId,
    /// Ciphertext is not valid base64, is too short, or does not decode to text.
    CiphertextFormat,
    /// AEAD tag mismatch: tampered ciphertext or wrong key.
    AuthenticationFailed,
    /// The caller cancelled the operation during I/O.
    Cancelled,
}

impl ErrorKind {
    /// Stable snake_case name, used as the `kind` log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::MountNotFound => "mount_not_found",
            ErrorKind::SecretMissing => "secret_missing",
            ErrorKind::CasConflict => "cas_conflict",
            ErrorKind::KeyNotFound => "key_not_found",
            ErrorKind::InvalidKeyLength => "invalid_key_length",
            ErrorKind::InvalidTenantId => "invalid_tenant_id",
            ErrorKind::CiphertextFormat => "ciphertext_format",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Whether a caller may reasonably retry the same call with backoff.
    ///
    /// Transport failures qualify, and so does a check-and-set conflict that
    /// outlasted the write retries: the contention is transient. Retrying an
    /// authentication failure or a malformed key can never succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection | ErrorKind::Cancelled | ErrorKind::CasConflict
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level service error type.
///
/// Never carries the internal failure detail. Variants map to HTTP status codes
/// returned to callers:
/// - [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::OperationFailed`] → 422
/// - [`ServiceError::Unavailable`] → 503
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request itself was malformed (invalid JSON, unusable tenant id).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The operation failed; the reason is only available in internal logs.
    #[error("operation failed")]
    OperationFailed,

    /// The secret backend is unavailable; the caller may retry with backoff.
    #[error("service unavailable")]
    Unavailable,
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::OperationFailed => 422,
            ServiceError::Unavailable => 503,
        }
    }

    /// Short machine-readable code for the error response body.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::OperationFailed => "operation_failed",
            ServiceError::Unavailable => "service_unavailable",
        }
    }
}

impl From<ErrorKind> for ServiceError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidTenantId => ServiceError::BadRequest("invalid tenant id".into()),
            k if k.is_retryable() => ServiceError::Unavailable,
            _ => ServiceError::OperationFailed,
        }
    }
}
