//! Bounded in-process cache with sliding TTL and least-recently-accessed
//! eviction.
//!
//! Entries are keyed on a canonical path plus an operation variant (for
//! example the read encoding), which lets callers drop everything cached for
//! one file or for a whole subtree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::errors::CacheError;

/// Largest share of `max_bytes` a single value may occupy, in tenths.
const MAX_ENTRY_SHARE_TENTHS: usize = 1;
/// Byte-pressure eviction shrinks the cache to this share of `max_bytes`, in tenths.
const EVICTION_TARGET_TENTHS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: PathBuf,
    variant: String,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>, variant: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            variant: variant.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub max_bytes: usize,
    pub max_entries: usize,
}

impl CacheStats {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            entries: 0,
            bytes: 0,
            hits: 0,
            misses: 0,
            hit_rate: 0.0,
            max_bytes: 0,
            max_entries: 0,
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    size: usize,
    created_at: Instant,
    // `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
    ttl: Duration,
    last_access: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug)]
pub struct Cache<V> {
    config: CacheConfig,
    entries: HashMap<CacheKey, CacheEntry<V>>,
    current_bytes: usize,
    hits: u64,
    misses: u64,
    // Monotonic access counter; orders entries for LRU without relying on clock resolution.
    clock: u64,
}

impl<V: Clone + Serialize> Cache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            current_bytes: 0,
            hits: 0,
            misses: 0,
            clock: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<V> {
        self.get_validated(key, |_| true)
    }

    /// Looks up `key`, treating the entry as a miss (and dropping it) when
    /// `is_fresh` rejects the stored value. A hit slides the expiry forward.
    pub fn get_validated(&mut self, key: &CacheKey, is_fresh: impl FnOnce(&V) -> bool) -> Option<V> {
        let now = Instant::now();
        let verdict = match self.entries.get(key) {
            None => Lookup::Absent,
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) if !is_fresh(&entry.value) => Lookup::Stale,
            Some(_) => Lookup::Hit,
        };

        match verdict {
            Lookup::Hit => {
                let tick = self.tick();
                self.hits += 1;
                let entry = self.entries.get_mut(key)?;
                entry.last_access = tick;
                entry.expires_at = now.checked_add(entry.ttl);
                Some(entry.value.clone())
            }
            Lookup::Absent => {
                self.misses += 1;
                None
            }
            Lookup::Expired | Lookup::Stale => {
                debug!(path = %key.path.display(), variant = %key.variant, reason = ?verdict, "dropping cache entry");
                self.remove(key);
                self.misses += 1;
                None
            }
        }
    }

    /// Counts a lookup that could not even be attempted.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// Inserts or replaces `key`. Returns `Ok(false)` when the value is too
    /// large to be worth caching.
    pub fn set(&mut self, key: CacheKey, value: V, ttl: Option<Duration>) -> Result<bool, CacheError> {
        let size = serde_json::to_vec(&value)?.len();
        if size.saturating_mul(10) > self.config.max_bytes.saturating_mul(MAX_ENTRY_SHARE_TENTHS) {
            debug!(path = %key.path.display(), size, "value too large to cache");
            return Ok(false);
        }

        self.remove(&key);
        let ttl = ttl.unwrap_or(self.config.ttl);
        let now = Instant::now();
        let tick = self.tick();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                size,
                created_at: now,
                expires_at: now.checked_add(ttl),
                ttl,
                last_access: tick,
            },
        );
        self.current_bytes += size;
        self.evict();
        Ok(true)
    }

    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        self.remove(key).is_some()
    }

    /// Drops every variant cached for exactly `path`.
    pub fn invalidate_path(&mut self, path: &Path) -> usize {
        self.invalidate_where(|key| key.path == path)
    }

    /// Drops everything cached at or below `prefix`, compared segment-wise.
    pub fn invalidate_prefix(&mut self, prefix: &Path) -> usize {
        self.invalidate_where(|key| key.path.starts_with(prefix))
    }

    fn invalidate_where(&mut self, mut matches: impl FnMut(&CacheKey) -> bool) -> usize {
        let doomed: Vec<CacheKey> = self.entries.keys().filter(|key| matches(key)).cloned().collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_bytes = 0;
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            enabled: true,
            entries: self.entries.len(),
            bytes: self.current_bytes,
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
            max_bytes: self.config.max_bytes,
            max_entries: self.config.max_entries,
        }
    }

    /// Age of the entry stored under `key`, if any.
    pub fn age(&self, key: &CacheKey) -> Option<Duration> {
        self.entries.get(key).map(|entry| entry.created_at.elapsed())
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &CacheKey) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.current_bytes = self.current_bytes.saturating_sub(entry.size);
        Some(entry.value)
    }

    fn evict(&mut self) {
        let now = Instant::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }

        let mut evicted = 0usize;
        if self.entries.len() > self.config.max_entries {
            let excess = self.entries.len() - self.config.max_entries;
            for key in self.least_recent_first().into_iter().take(excess) {
                self.remove(&key);
                evicted += 1;
            }
        }

        if self.current_bytes > self.config.max_bytes {
            let target = self.config.max_bytes / 10 * EVICTION_TARGET_TENTHS;
            for key in self.least_recent_first() {
                if self.current_bytes <= target {
                    break;
                }
                self.remove(&key);
                evicted += 1;
            }
        }

        if !expired.is_empty() || evicted > 0 {
            debug!(
                expired = expired.len(),
                evicted,
                entries = self.entries.len(),
                bytes = self.current_bytes,
                "cache eviction"
            );
        }
    }

    fn least_recent_first(&self) -> Vec<CacheKey> {
        let mut keys: Vec<(u64, &CacheKey)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_access, key))
            .collect();
        keys.sort_by_key(|(access, _)| *access);
        keys.into_iter().map(|(_, key)| key.clone()).collect()
    }
}

#[derive(Debug)]
enum Lookup {
    Absent,
    Expired,
    Stale,
    Hit,
}
