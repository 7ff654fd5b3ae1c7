use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Reasons a requested path is refused before any disk access happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("path must not be empty")]
    Empty,
    #[error("null byte in path")]
    NullByte,
    #[error("forbidden character '{0}' in path")]
    InjectionCharacter(char),
    #[error("path traversal detected: '{0}' escapes the sandbox root")]
    PathTraversal(String),
    #[error("path '{0}' is outside the sandbox root")]
    OutsideRoot(String),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid path: {0}")]
    Validation(#[from] ValidationError),
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("invalid search pattern: {0}")]
    InvalidPattern(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SandboxError {
    /// Maps an I/O failure on `path` onto the caller-facing taxonomy.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SandboxError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => SandboxError::PermissionDenied(path.to_path_buf()),
            _ => SandboxError::Io(err),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SandboxError::Validation(_))
    }
}

/// Failures inside the cache layer. These never reach callers of `SandboxFs`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to measure cache value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to stat cached source: {0}")]
    Stat(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
