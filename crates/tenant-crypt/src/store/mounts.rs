//! Per-mount cache of detected KV protocol versions.
//!
//! A mount's version is detected once and reused for the lifetime of the
//! client. The cache uses `arc-swap` so lookups on the hot path never block.

use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use super::KvVersion;

/// Shared, lock-free map of mount path to detected [`KvVersion`].
#[derive(Clone, Debug)]
pub struct MountCache {
    inner: Arc<ArcSwap<HashMap<String, KvVersion>>>,
}

impl MountCache {
    /// Create a new, empty [`MountCache`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(Arc::new(HashMap::new()))),
        }
    }

    /// Return the number of mounts whose version is known.
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    /// Return `true` if no mount has been detected yet.
    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Look up the cached version for `mount`.
    pub fn get(&self, mount: &str) -> Option<KvVersion> {
        self.inner.load().get(normalize(mount)).copied()
    }

    /// Record the detected version for `mount`.
    ///
    /// Concurrent detections of the same mount agree, so a lost race only
    /// repeats work.
    pub fn insert(&self, mount: &str, version: KvVersion) {
        let key = normalize(mount).to_owned();
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(key.clone(), version);
            next
        });
    }
}

impl Default for MountCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Mount paths are compared without surrounding slashes.
pub(crate) fn normalize(mount: &str) -> &str {
    mount.trim_matches('/')
}
