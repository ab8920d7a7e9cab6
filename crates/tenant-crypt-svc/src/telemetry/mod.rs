//! Structured logging and optional OpenTelemetry span export.
//!
//! # Telemetry invariants
//!
//! - **No plaintext, ciphertext, or key material** in any span attribute or
//!   log field. Tenant ids and error kinds only.
//! - Decrypt failures are emitted on the `tenant_crypt::audit` target; route
//!   it with `RUST_LOG` to keep or drop them independently.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`).

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
