//! In-process [`SecretStore`] with KV v2 semantics.
//!
//! Used as the test double for the key registry and for local runs without a
//! backend. Objects are versioned and check-and-set is enforced exactly as a
//! V2 mount would; constructed with [`KvVersion::V1`] it drops versions and
//! ignores CAS instead.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{cancellable, KvVersion, Secret, SecretData, SecretStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    data: SecretData,
    version: u64,
}

/// Thread-safe in-memory secret store.
///
/// Clones share the same underlying objects.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    version: KvVersion,
    latency: Option<Duration>,
}

impl MemoryStore {
    /// Create an empty store with V2 semantics.
    pub fn new() -> Self {
        Self::with_version(KvVersion::V2)
    }

    /// Create an empty store speaking the given protocol generation.
    pub fn with_version(version: KvVersion) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            version,
            latency: None,
        }
    }

    /// Delay every `get` and `put` by `latency` before touching state.
    ///
    /// Widens the window between reads and writes so concurrent callers
    /// actually interleave.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of objects currently stored.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Return `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Current version of the object at `path`, if any.
    pub async fn current_version(&self, path: &str) -> Option<u64> {
        self.inner.read().await.get(path).map(|e| e.version)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    fn version(&self) -> KvVersion {
        self.version
    }

    async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Secret, StoreError> {
        cancellable(cancel, async {
            self.simulate_latency().await;
            let map = self.inner.read().await;
            let entry = map.get(path).ok_or_else(|| StoreError::SecretMissing {
                path: path.to_owned(),
            })?;
            Ok(Secret {
                data: entry.data.clone(),
                version: match self.version {
                    KvVersion::V1 => None,
                    KvVersion::V2 => Some(entry.version),
                },
            })
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
        cancellable(cancel, async {
            self.simulate_latency().await;
            let mut map = self.inner.write().await;
            // Last chance to back out: nothing below can be interrupted.
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            let current = map.get(path).map(|e| e.version).unwrap_or(0);
            if self.version == KvVersion::V2 {
                if let Some(expected) = cas {
                    if expected != current {
                        return Err(StoreError::CasConflict {
                            path: path.to_owned(),
                        });
                    }
                }
            }

            let version = current + 1;
            map.insert(path.to_owned(), Entry { data, version });
            Ok(match self.version {
                KvVersion::V1 => None,
                KvVersion::V2 => Some(version),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(key: &str, value: &str) -> SecretData {
        let mut data = SecretData::new();
        data.insert(key.into(), json!(value));
        data
    }

    #[tokio::test]
    async fn get_missing_path() {
        let store = MemoryStore::new();
        let err = store.get("nope", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::SecretMissing { ref path } if path == "nope"));
    }

    #[tokio::test]
    async fn put_replaces_whole_object() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        store.put("p", object("a", "1"), None, &cancel).await.unwrap();
        store.put("p", object("b", "2"), None, &cancel).await.unwrap();

        let secret = store.get("p", &cancel).await.unwrap();
        assert!(secret.data.get("a").is_none());
        assert_eq!(secret.data["b"], "2");
        assert_eq!(secret.version, Some(2));
    }

    #[tokio::test]
    async fn cas_zero_only_creates() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        assert_eq!(
            store.put("p", object("a", "1"), Some(0), &cancel).await.unwrap(),
            Some(1)
        );
        let err = store
            .put("p", object("a", "2"), Some(0), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CasConflict { .. }));
        assert_eq!(store.get("p", &cancel).await.unwrap().data["a"], "1");
    }

    #[tokio::test]
    async fn v1_ignores_cas_and_versions() {
        let store = MemoryStore::with_version(KvVersion::V1);
        let cancel = CancellationToken::new();
        store.put("p", object("a", "1"), Some(0), &cancel).await.unwrap();
        let version = store.put("p", object("a", "2"), Some(0), &cancel).await.unwrap();
        assert_eq!(version, None);
        let secret = store.get("p", &cancel).await.unwrap();
        assert_eq!(secret.version, None);
        assert_eq!(secret.data["a"], "2");
    }

    #[tokio::test]
    async fn cancelled_put_keeps_prior_value() {
        let store = MemoryStore::new().with_latency(Duration::from_millis(50));
        let cancel = CancellationToken::new();
        store.put("p", object("a", "1"), None, &cancel).await.unwrap();

        let doomed = CancellationToken::new();
        let trigger = doomed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });
        let err = store
            .put("p", object("a", "2"), None, &doomed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert_eq!(store.get("p", &cancel).await.unwrap().data["a"], "1");
        assert_eq!(store.current_version("p").await, Some(1));
    }
}
