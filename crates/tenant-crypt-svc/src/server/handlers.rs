//! Axum request handlers for all service endpoints.
//!
//! Every handler takes a cancellation token from [`AppState::request_token`]:
//! if the request future is dropped (client gone, timeout layer fired) or the
//! process shuts down, backend I/O still in flight is abandoned.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, ErrorResponse,
    HealthResponse, ProvisionResponse,
};
use common::ServiceError;
use tenant_crypt::CipherError;
use thiserror::Error;
use tracing::debug;

use super::state::AppState;

/// Handler error: an opaque [`ServiceError`] rendered as [`ErrorResponse`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] ServiceError);

impl From<CipherError> for ApiError {
    fn from(err: CipherError) -> Self {
        // The core already logged tenant and kind; only the class escapes.
        Self(ServiceError::from(err.kind()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(status = %rejection.status(), "rejected request body");
        Self(ServiceError::BadRequest("malformed request body".into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

/// `PUT /v1/tenants/:tenant_id/key`: make sure the tenant has a key.
///
/// Idempotent. The response never contains key bytes.
pub async fn provision(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<ProvisionResponse>, ApiError> {
    let (cancel, _guard) = state.request_token();

    state.cipher.ensure_key(&tenant_id, &cancel).await?;
    Ok(Json(ProvisionResponse {
        tenant_id,
        provisioned: true,
    }))
}

/// `POST /v1/encrypt`: seal one field value under the tenant's key.
pub async fn encrypt(
    State(state): State<AppState>,
    body: Result<Json<EncryptRequest>, JsonRejection>,
) -> Result<Json<EncryptResponse>, ApiError> {
    let Json(req) = body?;
    let (cancel, _guard) = state.request_token();

    let ciphertext = state
        .cipher
        .encrypt(&req.tenant_id, &req.plaintext, &cancel)
        .await?;
    Ok(Json(EncryptResponse { ciphertext }))
}

/// `POST /v1/decrypt`: open one field value. Never provisions a key.
pub async fn decrypt(
    State(state): State<AppState>,
    body: Result<Json<DecryptRequest>, JsonRejection>,
) -> Result<Json<DecryptResponse>, ApiError> {
    let Json(req) = body?;
    let (cancel, _guard) = state.request_token();

    let plaintext = state
        .cipher
        .decrypt(&req.tenant_id, &req.ciphertext, &cancel)
        .await?;
    Ok(Json(DecryptResponse { plaintext }))
}

/// `GET /health`: liveness and readiness check.
///
/// Returns `200 OK` when the secret backend answers its health check and
/// `503 Service Unavailable` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let (cancel, _guard) = state.request_token();
    let backend_reachable = state.backend.reachable(&cancel).await;

    let (status_code, status_str) = if backend_reachable {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        backend_reachable,
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}
