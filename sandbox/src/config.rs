use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::errors::Result;
use crate::path;

const MIB: usize = 1024 * 1024;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
pub const DEFAULT_CACHEABLE_FILE_SIZE: u64 = 1024 * 1024; // 1MB
pub const DEFAULT_SKIP_DIRS: &[&str] = &[".git", "node_modules", ".DS_Store", ".svn", ".hg", "target"];

/// Bounds for a [`crate::cache::Cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_bytes: usize,
    pub max_entries: usize,
    pub ttl: Duration,
}

impl CacheConfig {
    /// 100MB / 100 entries / 5 minutes.
    pub fn generic() -> Self {
        Self {
            max_bytes: 100 * MIB,
            max_entries: 100,
            ttl: Duration::from_secs(5 * 60),
        }
    }

    /// 50MB / 50 entries / 2 minutes. File-backed entries are revalidated
    /// against disk on every lookup, so the TTL mostly bounds idle memory.
    pub fn content_aware() -> Self {
        Self {
            max_bytes: 50 * MIB,
            max_entries: 50,
            ttl: Duration::from_secs(2 * 60),
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::generic()
    }
}

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub root: PathBuf,
    pub extra_roots: Vec<PathBuf>,
    pub max_file_size: u64,
    pub cacheable_file_size: u64,
    pub enable_cache: bool,
    pub cache: CacheConfig,
    pub audit_capacity: usize,
    pub search_skip_dirs: Vec<String>,
}

impl SandboxConfig {
    /// Creates the root if needed and pins it to its canonical form.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let base = path::ensure_absolute_base(root.as_ref())?;
        fs::create_dir_all(&base)?;
        let root = fs::canonicalize(&base)?;
        Ok(Self {
            root,
            extra_roots: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            cacheable_file_size: DEFAULT_CACHEABLE_FILE_SIZE,
            enable_cache: true,
            cache: CacheConfig::content_aware(),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            search_skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|d| d.to_string()).collect(),
        })
    }

    /// Additional directories `change_root` may move into. Must already exist.
    pub fn with_extra_root(mut self, root: impl AsRef<Path>) -> Result<Self> {
        let base = path::ensure_absolute_base(root.as_ref())?;
        self.extra_roots.push(fs::canonicalize(base)?);
        Ok(self)
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_cacheable_file_size(mut self, size: u64) -> Self {
        self.cacheable_file_size = size;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity.max(1);
        self
    }

    pub fn with_search_skip_dirs(mut self, dirs: impl IntoIterator<Item = String>) -> Self {
        self.search_skip_dirs = dirs
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    pub(crate) fn allowed_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.root.clone()];
        roots.extend(self.extra_roots.iter().cloned());
        roots
    }
}
