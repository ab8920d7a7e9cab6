//! Request and response types for the sidecar's JSON API.
//!
//! None of these types carry key material. Tenant provisioning returns only
//! an acknowledgement.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

/// Response body for `PUT /v1/tenants/:tenant_id/key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionResponse {
    /// The tenant whose key is now guaranteed to exist.
    pub tenant_id: String,
    /// Always `true` on success.
    pub provisioned: bool,
}

// ---------------------------------------------------------------------------
// Encrypt / decrypt
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptRequest {
    /// Tenant whose key seals the value.
    pub tenant_id: String,
    /// Field value to encrypt. An empty string encrypts to an empty string.
    pub plaintext: String,
}

/// Successful response body for `POST /v1/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptResponse {
    /// `base64(nonce || ciphertext || tag)`, standard alphabet, padded.
    pub ciphertext: String,
}

/// Request body for `POST /v1/decrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptRequest {
    /// Tenant whose key opens the value.
    pub tenant_id: String,
    /// Value previously produced by `POST /v1/encrypt` for the same tenant.
    pub ciphertext: String,
}

/// Successful response body for `POST /v1/decrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptResponse {
    /// Recovered field value.
    pub plaintext: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"operation_failed"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::ServiceError> for ErrorResponse {
    fn from(err: &crate::ServiceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Whether the secret backend answered its health check.
    pub backend_reachable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceError;

    #[test]
    fn encrypt_request_field_names() {
        let req: EncryptRequest =
            serde_json::from_str(r#"{"tenant_id":"inst-001","plaintext":"hello"}"#).unwrap();
        assert_eq!(req.tenant_id, "inst-001");
        assert_eq!(req.plaintext, "hello");
    }

    #[test]
    fn error_response_from_service_error_is_opaque() {
        let e = ErrorResponse::from(&ServiceError::OperationFailed);
        assert_eq!(e.code, "operation_failed");
        assert_eq!(e.message, "operation failed");
    }

    #[test]
    fn provision_response_has_no_key_field() {
        let body = serde_json::to_value(ProvisionResponse {
            tenant_id: "inst-001".into(),
            provisioned: true,
        })
        .unwrap();
        let obj = body.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("provisioned"));
    }
}
