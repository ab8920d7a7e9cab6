//! `tenant-crypt-svc`: HTTP sidecar entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`ServiceConfig`] and [`CryptConfig`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Connect to the secret backend and validate the credential.
//! 4. Detect the KV version of the configured mount.
//! 5. Build the key registry and cipher service.
//! 6. Build the Axum router and serve until SIGINT / SIGTERM.

mod config;
mod server;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tenant_crypt::{
    store::VaultClient, CancellationToken, CipherService, CryptConfig, KeyRegistry, SecretStore,
};
use tracing::info;

use config::ServiceConfig;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let (svc_cfg, crypt_cfg) = ServiceConfig::from_env()
        .and_then(|s| Ok((s, CryptConfig::from_env()?)))
        .map_err(|e| {
            // Telemetry is not yet up; write to stderr directly.
            eprintln!("ERROR: configuration invalid: {e:#}");
            e
        })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(svc_cfg.otlp_endpoint(), &svc_cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = svc_cfg.listen_port,
        layout = ?crypt_cfg.layout(),
        key_len = crypt_cfg.key_len,
        "tenant-crypt-svc starting"
    );

    // -----------------------------------------------------------------------
    // 3. Secret backend
    // -----------------------------------------------------------------------
    let shutdown = CancellationToken::new();
    let vault = VaultClient::connect(
        &crypt_cfg.vault_addr,
        &crypt_cfg.vault_token,
        crypt_cfg.timeout(),
        &shutdown,
    )
    .await
    .context("failed to connect to secret backend")?;

    // -----------------------------------------------------------------------
    // 4. KV mount
    // -----------------------------------------------------------------------
    let kv = vault
        .kv(&crypt_cfg.vault_mount, &shutdown)
        .await
        .with_context(|| format!("failed to open mount {}", crypt_cfg.vault_mount))?;
    info!(mount = kv.mount(), version = ?kv.version(), "secret mount ready");

    // -----------------------------------------------------------------------
    // 5. Key registry + cipher service
    // -----------------------------------------------------------------------
    let registry = KeyRegistry::new(Arc::new(kv), crypt_cfg.layout(), crypt_cfg.key_len);
    let cipher = CipherService::new(registry);

    // -----------------------------------------------------------------------
    // 6. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(cipher, Arc::new(vault), shutdown.clone());
    let router = server::router::build(state);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], svc_cfg.listen_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("tenant-crypt-svc shut down");
    telemetry::shutdown_telemetry();
    Ok(())
}

/// Resolve on SIGINT or SIGTERM, cancelling `token` so in-flight backend
/// calls stop promptly.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    token.cancel();
}
