//! File-backed cache whose entries are only valid while the source file on
//! disk is unchanged.
//!
//! Every lookup stats the source first. An entry is served only if the live
//! modification time and size equal the ones captured when the value was
//! read; otherwise it is evicted on the spot and the lookup is a miss.

use std::fs::{self, Metadata};
use std::path::Path;
use std::time::SystemTime;

use serde::Serialize;
use tracing::debug;

use crate::cache::{Cache, CacheKey, CacheStats};
use crate::config::CacheConfig;
use crate::errors::CacheError;

/// Modification time and byte size of a file at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    pub modified: Option<SystemTime>,
    pub size: u64,
}

impl Fingerprint {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            size: metadata.len(),
        }
    }

    pub fn of(path: &Path) -> Result<Self, CacheError> {
        Ok(Self::from_metadata(&fs::metadata(path)?))
    }
}

#[derive(Debug, Clone, Serialize)]
struct Stamped<V> {
    source: Fingerprint,
    value: V,
}

#[derive(Debug)]
pub struct ContentAwareCache<V> {
    inner: Cache<Stamped<V>>,
}

impl<V: Clone + Serialize> ContentAwareCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Cache::new(config),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        self.inner.config()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.contains(key)
    }

    /// Returns the cached value for `key` if its source is unchanged on disk.
    /// A failing stat is a miss; the caller's direct I/O will surface the error.
    pub fn get(&mut self, key: &CacheKey) -> Option<V> {
        let live = match Fingerprint::of(key.path()) {
            Ok(live) => live,
            Err(err) => {
                debug!(path = %key.path().display(), variant = key.variant(), error = %err, "cannot stat cached source");
                self.inner.invalidate(key);
                self.inner.record_miss();
                return None;
            }
        };
        self.inner
            .get_validated(key, |stamped| stamped.source == live)
            .map(|stamped| stamped.value)
    }

    /// Stores `value` together with the fingerprint captured when it was read.
    pub fn set(&mut self, key: CacheKey, source: Fingerprint, value: V) -> Result<bool, CacheError> {
        self.inner.set(key, Stamped { source, value }, None)
    }

    /// Stats the source now and stores `value` against that fingerprint.
    pub fn set_current(&mut self, key: CacheKey, value: V) -> Result<bool, CacheError> {
        let source = Fingerprint::of(key.path())?;
        self.set(key, source, value)
    }

    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        self.inner.invalidate(key)
    }

    pub fn invalidate_path(&mut self, path: &Path) -> usize {
        self.inner.invalidate_path(path)
    }

    pub fn invalidate_prefix(&mut self, prefix: &Path) -> usize {
        self.inner.invalidate_prefix(prefix)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
