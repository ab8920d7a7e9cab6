//! Client for a Vault-compatible KV secret backend, built on `vaultrs`.
//!
//! [`VaultClient`] is the connection handle: it authenticates, detects mount
//! versions, and checks health. [`KvMount`] binds the handle to one mount with
//! its version resolved, and is what implements [`SecretStore`].
//!
//! Every backend call runs under [`cancellable`], so a cancelled request never
//! reaches the network.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vaultrs::{
    api::kv2::requests::SetSecretRequestOptions,
    client::{Client, VaultClientSettingsBuilder},
    error::ClientError,
    kv1, kv2, sys, token,
};

use super::{
    cancellable,
    mounts::{normalize, MountCache},
    KvVersion, Secret, SecretData, SecretStore, StoreError,
};

/// Authenticated connection handle to the secret backend.
///
/// Cheap to clone; clones share the underlying client and the mount cache.
#[derive(Clone)]
pub struct VaultClient {
    inner: Arc<vaultrs::client::VaultClient>,
    /// Unauthenticated client for `sys/health` only.
    http: reqwest::Client,
    address: Arc<str>,
    mounts: MountCache,
}

impl fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address)
            .field("token", &"[REDACTED]")
            .field("mounts", &self.mounts.len())
            .finish()
    }
}

impl VaultClient {
    /// Connect to the backend at `address` and validate `token`.
    ///
    /// `timeout` bounds every request made through the returned handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the address is unusable, the
    /// backend is unreachable, or it rejects the credential.
    pub async fn connect(
        address: &str,
        token: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, StoreError> {
        let address = address.trim_end_matches('/');
        // The settings builder panics on an unparsable address.
        Url::parse(address)
            .map_err(|e| StoreError::Connection(format!("invalid backend address: {e}")))?;

        let mut settings = VaultClientSettingsBuilder::default();
        settings.address(address);
        settings.timeout(Some(timeout));
        let settings = settings
            .build()
            .map_err(|e| StoreError::Connection(format!("invalid backend settings: {e}")))?;
        let mut inner = vaultrs::client::VaultClient::new(settings)
            .map_err(|e| StoreError::Connection(format!("failed to build backend client: {e}")))?;
        inner.set_token(token);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to build HTTP client: {e}")))?;

        let client = Self {
            inner: Arc::new(inner),
            http,
            address: Arc::from(address),
            mounts: MountCache::new(),
        };

        cancellable(cancel, async {
            token::lookup_self(&*client.inner)
                .await
                .map_err(backend_error)
        })
        .await?;

        info!(address = %client.address, "connected to secret backend");
        Ok(client)
    }

    /// Detect whether `mount` speaks KV v1 or v2.
    ///
    /// The answer is cached per mount; only the first call does I/O.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MountNotFound`] if the backend has no such mount.
    pub async fn detect_version(
        &self,
        mount: &str,
        cancel: &CancellationToken,
    ) -> Result<KvVersion, StoreError> {
        if let Some(version) = self.mounts.get(mount) {
            return Ok(version);
        }

        let listing = cancellable(cancel, async {
            sys::mount::list(&*self.inner)
                .await
                .map_err(backend_error)
        })
        .await?;

        // Mount listings key entries as "<mount>/".
        let entry = listing
            .get(&format!("{}/", normalize(mount)))
            .ok_or_else(|| StoreError::MountNotFound {
                mount: normalize(mount).to_owned(),
            })?;
        let option = entry
            .options
            .as_ref()
            .and_then(|o| o.get("version"))
            .map(String::as_str);
        let version = KvVersion::from_mount(Some(entry.mount_type.as_str()), option);

        self.mounts.insert(mount, version);
        debug!(mount = normalize(mount), ?version, "detected KV mount version");
        Ok(version)
    }

    /// Bind this handle to `mount`, detecting its version if not yet known.
    pub async fn kv(&self, mount: &str, cancel: &CancellationToken) -> Result<KvMount, StoreError> {
        let version = self.detect_version(mount, cancel).await?;
        Ok(KvMount {
            client: self.clone(),
            mount: normalize(mount).to_owned(),
            version,
        })
    }

    /// Check backend health via the unauthenticated `sys/health` endpoint.
    ///
    /// Active and standby nodes count as healthy; sealed or uninitialised
    /// backends do not.
    pub async fn health(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let url = format!("{}/v1/sys/health", self.address);
        let status = cancellable(cancel, async {
            self.http
                .get(url)
                .send()
                .await
                .map(|resp| resp.status())
                .map_err(|e| {
                    StoreError::Connection(format!("health check failed: {}", e.without_url()))
                })
        })
        .await?;

        match status.as_u16() {
            200 | 429 | 473 => Ok(()),
            code => Err(StoreError::Connection(format!(
                "secret backend unhealthy ({code})"
            ))),
        }
    }
}

/// A [`VaultClient`] bound to one KV mount with a resolved protocol version.
#[derive(Clone, Debug)]
pub struct KvMount {
    client: VaultClient,
    mount: String,
    version: KvVersion,
}

impl KvMount {
    /// Mount path, without surrounding slashes.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    fn backend(&self) -> &vaultrs::client::VaultClient {
        &self.client.inner
    }

    async fn read_v1(&self, path: &str) -> Result<Secret, StoreError> {
        let data = kv1::get::<SecretData>(self.backend(), &self.mount, path)
            .await
            .map_err(|e| read_error(e, path))?;
        Ok(Secret {
            data,
            version: None,
        })
    }

    /// Metadata is read before data: if another writer lands in between,
    /// a later check-and-set against the older version conflicts instead of
    /// overwriting.
    async fn read_v2(&self, path: &str) -> Result<Secret, StoreError> {
        let meta = kv2::read_metadata(self.backend(), &self.mount, path)
            .await
            .map_err(|e| read_error(e, path))?;
        let data = kv2::read::<SecretData>(self.backend(), &self.mount, path)
            .await
            .map_err(|e| read_error(e, path))?;
        Ok(Secret {
            data,
            version: Some(meta.current_version),
        })
    }

    async fn write_v1(&self, path: &str, data: &SecretData) -> Result<Option<u64>, StoreError> {
        let body: HashMap<&str, &Value> = data.iter().map(|(k, v)| (k.as_str(), v)).collect();
        kv1::set(self.backend(), &self.mount, path, &body)
            .await
            .map_err(backend_error)?;
        Ok(None)
    }

    async fn write_v2(
        &self,
        path: &str,
        data: &SecretData,
        cas: Option<u64>,
    ) -> Result<Option<u64>, StoreError> {
        let written = match cas {
            None => kv2::set(self.backend(), &self.mount, path, data)
                .await
                .map_err(backend_error)?,
            Some(cas) => {
                let cas = u32::try_from(cas).map_err(|_| {
                    StoreError::Connection(format!("check-and-set version {cas} out of range"))
                })?;
                kv2::set_with_options(
                    self.backend(),
                    &self.mount,
                    path,
                    data,
                    SetSecretRequestOptions { cas },
                )
                .await
                .map_err(|e| match e {
                    ClientError::APIError { code: 400, .. } => StoreError::CasConflict {
                        path: path.to_owned(),
                    },
                    other => backend_error(other),
                })?
            }
        };
        Ok(Some(written.version))
    }
}

#[async_trait]
impl SecretStore for KvMount {
    fn version(&self) -> KvVersion {
        self.version
    }

    async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Secret, StoreError> {
        let path = path.trim_matches('/');
        cancellable(cancel, async {
            match self.version {
                KvVersion::V1 => self.read_v1(path).await,
                KvVersion::V2 => self.read_v2(path).await,
            }
        })
        .await
    }

    async fn put(
        &self,
        path: &str,
        data: SecretData,
        cas: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, StoreError> {
        let path = path.trim_matches('/');
        let version = cancellable(cancel, async {
            match self.version {
                // V1 has no check-and-set; the option is dropped.
                KvVersion::V1 => self.write_v1(path, &data).await,
                KvVersion::V2 => self.write_v2(path, &data, cas).await,
            }
        })
        .await?;

        debug!(mount = %self.mount, path, "secret written");
        Ok(version)
    }
}

/// A 404 on a read means the object (or its current version) is absent.
fn read_error(err: ClientError, path: &str) -> StoreError {
    match err {
        ClientError::APIError { code: 404, .. } => StoreError::SecretMissing {
            path: path.to_owned(),
        },
        other => backend_error(other),
    }
}

/// Collapse a client failure into a transport-class error.
///
/// Response bodies are never echoed: a failed parse of a key object would
/// otherwise carry key material into the message.
fn backend_error(err: ClientError) -> StoreError {
    match err {
        ClientError::APIError {
            code: code @ (401 | 403),
            ..
        } => StoreError::Connection(format!("credential rejected by secret backend ({code})")),
        ClientError::APIError { code, .. } => {
            StoreError::Connection(format!("unexpected status from secret backend: {code}"))
        }
        ClientError::RestClientError { .. } => {
            StoreError::Connection("request to secret backend failed".into())
        }
        _ => StoreError::Connection("malformed response from secret backend".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyLayout, KeyRegistry};
    use common::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "test-token";
    const TOKEN_HEADER: &str = "X-Vault-Token";

    /// Wrap `data` in the response envelope every API reply carries.
    fn envelope(data: Value) -> Value {
        json!({
            "request_id": "5e7c0a56-7d0b-4a86-9d1c-0f1b2e3c4d5e",
            "lease_id": "",
            "renewable": false,
            "lease_duration": 0,
            "data": data,
            "wrap_info": null,
            "warnings": null,
            "auth": null
        })
    }

    fn ok(data: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(envelope(data))
    }

    fn mount_entry(engine: &str, options: Value) -> Value {
        json!({
            "accessor": "kv_8c1b2a3f",
            "config": {"default_lease_ttl": 0, "force_no_cache": false, "max_lease_ttl": 0},
            "description": "",
            "external_entropy_access": false,
            "local": false,
            "options": options,
            "seal_wrap": false,
            "type": engine,
            "uuid": "9a0f7f7e-2b55-4c1e-8a53-1a1f4f1d2c3b"
        })
    }

    fn version_meta(version: u64) -> Value {
        json!({
            "created_time": "2026-01-01T00:00:00Z",
            "custom_metadata": null,
            "deletion_time": "",
            "destroyed": false,
            "version": version
        })
    }

    fn object_meta(current_version: u64) -> Value {
        json!({
            "cas_required": false,
            "created_time": "2026-01-01T00:00:00Z",
            "current_version": current_version,
            "custom_metadata": null,
            "delete_version_after": "0s",
            "max_versions": 0,
            "oldest_version": 0,
            "updated_time": "2026-01-01T00:00:00Z",
            "versions": {
                current_version.to_string(): {
                    "created_time": "2026-01-01T00:00:00Z",
                    "deletion_time": "",
                    "destroyed": false
                }
            }
        })
    }

    async fn mock_lookup_self(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/auth/token/lookup-self"))
            .and(header(TOKEN_HEADER, TOKEN))
            .respond_with(ok(json!({
                "accessor": "8609694a-cdbc-db9b-d345-e782dbb562ed",
                "creation_time": 1_767_225_600u64,
                "creation_ttl": 0,
                "display_name": "token",
                "entity_id": "",
                "expire_time": null,
                "explicit_max_ttl": 0,
                "id": TOKEN,
                "identity_policies": null,
                "issue_time": "2026-01-01T00:00:00Z",
                "meta": null,
                "num_uses": 0,
                "orphan": true,
                "path": "auth/token/create",
                "policies": ["tenant-crypt"],
                "renewable": false,
                "ttl": 0,
                "type": "service"
            })))
            .mount(server)
            .await;
    }

    async fn mock_mounts(server: &MockServer, listing: Value) {
        Mock::given(method("GET"))
            .and(path("/v1/sys/mounts"))
            .respond_with(ok(listing))
            .mount(server)
            .await;
    }

    async fn connected(server: &MockServer) -> VaultClient {
        mock_lookup_self(server).await;
        VaultClient::connect(
            &server.uri(),
            TOKEN,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    async fn kv_mount(server: &MockServer, version: &str) -> KvMount {
        let client = connected(server).await;
        mock_mounts(
            server,
            json!({"secret/": mount_entry("kv", json!({"version": version}))}),
        )
        .await;
        client.kv("secret", &CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn connect_rejects_bad_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth/token/lookup-self"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]})),
            )
            .mount(&server)
            .await;

        let err = VaultClient::connect(
            &server.uri(),
            "wrong",
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!err.to_string().contains("wrong"));
    }

    #[tokio::test]
    async fn connect_unreachable_backend_is_connection_error() {
        let err = VaultClient::connect(
            "http://127.0.0.1:1",
            TOKEN,
            Duration::from_secs(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn connect_rejects_unparsable_address() {
        let err = VaultClient::connect(
            "not a url",
            TOKEN,
            Duration::from_secs(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn debug_output_redacts_token() {
        let server = MockServer::start().await;
        let client = connected(&server).await;
        let dbg = format!("{client:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains(TOKEN));
    }

    #[tokio::test]
    async fn detects_v2_once_per_mount() {
        let server = MockServer::start().await;
        let client = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/mounts"))
            .respond_with(ok(
                json!({"secret/": mount_entry("kv", json!({"version": "2"}))}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        assert_eq!(client.detect_version("secret", &cancel).await.unwrap(), KvVersion::V2);
        assert_eq!(client.detect_version("secret/", &cancel).await.unwrap(), KvVersion::V2);
    }

    #[tokio::test]
    async fn detects_v1_without_version_option() {
        let server = MockServer::start().await;
        let client = connected(&server).await;
        mock_mounts(&server, json!({"kv/": mount_entry("kv", Value::Null)})).await;

        let version = client
            .detect_version("kv", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(version, KvVersion::V1);
    }

    #[tokio::test]
    async fn missing_mount_is_reported() {
        let server = MockServer::start().await;
        let client = connected(&server).await;
        mock_mounts(&server, json!({"sys/": mount_entry("system", Value::Null)})).await;

        let err = client
            .detect_version("secret", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MountNotFound { ref mount } if mount == "secret"));
    }

    #[tokio::test]
    async fn v2_get_reports_current_version() {
        let server = MockServer::start().await;
        let kv = kv_mount(&server, "2").await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/metadata/keys/inst-001"))
            .and(header(TOKEN_HEADER, TOKEN))
            .respond_with(ok(object_meta(3)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/keys/inst-001"))
            .and(header(TOKEN_HEADER, TOKEN))
            .respond_with(ok(json!({
                "data": {"inst-001": "a2V5"},
                "metadata": version_meta(3)
            })))
            .mount(&server)
            .await;

        let secret = kv.get("keys/inst-001", &CancellationToken::new()).await.unwrap();
        assert_eq!(secret.version, Some(3));
        assert_eq!(secret.data["inst-001"], "a2V5");
    }

    #[tokio::test]
    async fn v2_get_missing_and_deleted() {
        let server = MockServer::start().await;
        let kv = kv_mount(&server, "2").await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/metadata/absent"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;
        // Soft-deleted current version: metadata exists, data does not.
        Mock::given(method("GET"))
            .and(path("/v1/secret/metadata/deleted"))
            .respond_with(ok(object_meta(2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/deleted"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let err = kv.get("absent", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecretMissing);
        let err = kv.get("deleted", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecretMissing);
    }

    #[tokio::test]
    async fn v2_put_sends_cas_and_returns_version() {
        let server = MockServer::start().await;
        let kv = kv_mount(&server, "2").await;
        Mock::given(method("POST"))
            .and(path("/v1/secret/data/keys/inst-001"))
            .and(body_partial_json(json!({
                "data": {"inst-001": "a2V5"},
                "options": {"cas": 0}
            })))
            .respond_with(ok(version_meta(1)))
            .expect(1)
            .mount(&server)
            .await;

        let mut data = SecretData::new();
        data.insert("inst-001".into(), json!("a2V5"));
        let version = kv
            .put("keys/inst-001", data, Some(0), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(version, Some(1));
    }

    #[tokio::test]
    async fn v2_rejected_cas_is_conflict() {
        let server = MockServer::start().await;
        let kv = kv_mount(&server, "2").await;
        Mock::given(method("POST"))
            .and(path("/v1/secret/data/keys/inst-001"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["check-and-set parameter did not match the current version"]
            })))
            .mount(&server)
            .await;

        let err = kv
            .put("keys/inst-001", SecretData::new(), Some(0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CasConflict { ref path } if path == "keys/inst-001"));
    }

    #[tokio::test]
    async fn v1_reads_and_writes_flat_objects() {
        let server = MockServer::start().await;
        let kv = kv_mount(&server, "1").await;
        assert_eq!(kv.version(), KvVersion::V1);
        Mock::given(method("GET"))
            .and(path("/v1/secret/institute-keys"))
            .respond_with(ok(json!({"inst-001": "a2V5"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/secret/institute-keys"))
            .and(body_json(json!({"inst-001": "a2V5", "inst-002": "b2V5"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let mut secret = kv.get("institute-keys", &cancel).await.unwrap();
        assert_eq!(secret.version, None);
        secret.data.insert("inst-002".into(), json!("b2V5"));
        let version = kv
            .put("institute-keys", secret.data, Some(7), &cancel)
            .await
            .unwrap();
        assert_eq!(version, None);
    }

    #[tokio::test]
    async fn server_error_is_connection_error() {
        let server = MockServer::start().await;
        let kv = kv_mount(&server, "2").await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/metadata/keys/inst-001"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;

        let err = kv
            .get("keys/inst-001", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn cancelled_put_never_reaches_backend() {
        let server = MockServer::start().await;
        let kv = kv_mount(&server, "2").await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = kv
            .put("keys/inst-001", SecretData::new(), None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn tenant_id_with_query_never_touches_another_tenant() {
        let server = MockServer::start().await;
        let kv = kv_mount(&server, "2").await;
        Mock::given(path_regex(r"^/v1/secret/(data|metadata)/"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .expect(0)
            .mount(&server)
            .await;

        let registry = KeyRegistry::new(
            Arc::new(kv),
            KeyLayout::PerTenant {
                prefix: "keys".into(),
            },
            32,
        );
        let cancel = CancellationToken::new();
        for id in ["victim?x", "victim#x", "victim%2Fx", "victim x"] {
            let err = registry.ensure_key(id, &cancel).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidTenantId, "{id:?}");
        }
    }

    #[tokio::test]
    async fn health_accepts_standby() {
        let server = MockServer::start().await;
        let client = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/health"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        assert!(client.health(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn health_rejects_sealed() {
        let server = MockServer::start().await;
        let client = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert!(client.health(&CancellationToken::new()).await.is_err());
    }
}
