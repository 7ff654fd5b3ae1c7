//! Sandboxed file access with a content-aware read cache.
//!
//! Every operation resolves its path against a fixed sandbox root and refuses
//! anything that would leave it. Reads and directory listings are served from
//! a cache that revalidates against the file's modification time and size, so
//! edits made outside this process show up on the very next read. Each call,
//! successful or not, lands in a bounded in-memory audit log.

pub mod audit;
pub mod cache;
pub mod config;
pub mod content_cache;
pub mod errors;
pub mod format;
pub mod fs;
pub mod path;
pub mod search;

pub use audit::{AuditLog, AuditRecord, OperationKind};
pub use cache::{Cache, CacheKey, CacheStats};
pub use config::{CacheConfig, SandboxConfig};
pub use content_cache::{ContentAwareCache, Fingerprint};
pub use errors::{CacheError, Result, SandboxError, ValidationError};
pub use fs::{
    CurrentDirectory, DeleteOptions, DeleteResult, DirEntry, Encoding, EntryKind, FileContent,
    FileInfo, ListOptions, ReadOptions, RootChange, SandboxFs, WriteOptions, WriteResult,
};
pub use path::PathValidator;
pub use search::{SearchMatch, SearchMode, SearchOptions};
