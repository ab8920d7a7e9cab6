//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use async_trait::async_trait;
use tenant_crypt::{store::VaultClient, CancellationToken, CipherService};
use tokio_util::sync::DropGuard;

/// Reachability check against the secret backend.
#[async_trait]
pub trait BackendHealth: Send + Sync {
    async fn reachable(&self, cancel: &CancellationToken) -> bool;
}

#[async_trait]
impl BackendHealth for VaultClient {
    async fn reachable(&self, cancel: &CancellationToken) -> bool {
        self.health(cancel).await.is_ok()
    }
}

/// Application state shared across all request handlers.
///
/// Every field is `Arc`-backed, so Axum clones the state per request cheaply.
#[derive(Clone)]
pub struct AppState {
    /// Encrypt / decrypt / ensure-key surface.
    pub cipher: CipherService,
    /// Health check against the secret backend.
    pub backend: Arc<dyn BackendHealth>,
    /// Cancelled on process shutdown; request tokens are children of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        cipher: CipherService,
        backend: Arc<dyn BackendHealth>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cipher,
            backend,
            shutdown,
        }
    }

    /// Token for one request: cancelled when the process shuts down or when
    /// the returned guard is dropped with the request future.
    pub fn request_token(&self) -> (CancellationToken, DropGuard) {
        let token = self.shutdown.child_token();
        let guard = token.clone().drop_guard();
        (token, guard)
    }
}
