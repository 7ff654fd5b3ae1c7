use std::ffi::OsString;
use std::fs::{self, FileType, Metadata};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditLog, AuditRecord, OperationKind};
use crate::cache::{CacheKey, CacheStats};
use crate::config::SandboxConfig;
use crate::content_cache::{ContentAwareCache, Fingerprint};
use crate::errors::{Result, SandboxError};
use crate::path::PathValidator;
use crate::search::{self, SearchMatch, SearchOptions};

const LISTING_VARIANT: &str = "list";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::Other
        }
    }

    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Relative to the sandbox root.
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Stat every entry. Listings with stats are never cached.
    pub with_stats: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    Base64,
    Binary,
}

impl Encoding {
    pub fn label(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Base64 => "base64",
            Encoding::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "encoding", content = "data", rename_all = "snake_case")]
pub enum FileContent {
    #[serde(rename = "utf-8")]
    Utf8(String),
    Base64(String),
    Bytes(Vec<u8>),
}

impl FileContent {
    fn encode(bytes: Vec<u8>, encoding: Encoding) -> Result<Self> {
        match encoding {
            Encoding::Utf8 => String::from_utf8(bytes).map(FileContent::Utf8).map_err(|_| {
                SandboxError::InvalidOperation(
                    "file is not valid utf-8; read it as base64 or binary".to_string(),
                )
            }),
            Encoding::Base64 => Ok(FileContent::Base64(BASE64.encode(bytes))),
            Encoding::Binary => Ok(FileContent::Bytes(bytes)),
        }
    }

    /// Raw file bytes, decoding base64 when needed.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            FileContent::Utf8(text) => Ok(text.as_bytes().to_vec()),
            FileContent::Base64(encoded) => BASE64.decode(encoded.as_bytes()).map_err(|err| {
                SandboxError::InvalidOperation(format!("invalid base64 payload: {err}"))
            }),
            FileContent::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub encoding: Encoding,
    /// Drop any cached copy before reading.
    pub force_refresh: bool,
}

impl ReadOptions {
    pub fn with_encoding(encoding: Encoding) -> Self {
        Self {
            encoding,
            force_refresh: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub create_parents: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            create_parents: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WriteResult {
    pub path: String,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Required to remove a directory together with its contents.
    pub recursive: bool,
    /// Copy the file to `<name>.deleted-<unix millis>` before removing it.
    pub backup: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub path: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    /// Inode change time where the platform exposes it.
    pub changed: Option<DateTime<Utc>>,
    pub permissions: String,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RootChange {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CurrentDirectory {
    pub root: PathBuf,
    pub allowed_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
enum CachedPayload {
    Content(FileContent),
    Listing(Vec<DirEntry>),
}

/// File access confined to one root, with a content-aware read cache and an
/// in-memory audit trail of every attempted operation.
///
/// The root of an instance never changes; [`SandboxFs::change_root`] hands
/// back a new instance instead.
#[derive(Debug)]
pub struct SandboxFs {
    config: SandboxConfig,
    validator: PathValidator,
    cache: Mutex<ContentAwareCache<CachedPayload>>,
    audit: Mutex<AuditLog>,
}

impl SandboxFs {
    pub fn new(config: SandboxConfig) -> Self {
        let validator = PathValidator::with_allowed_roots(config.root.clone(), config.allowed_roots());
        Self {
            cache: Mutex::new(ContentAwareCache::new(config.cache)),
            audit: Mutex::new(AuditLog::new(config.audit_capacity)),
            validator,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.validator.root()
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn current_directory(&self) -> CurrentDirectory {
        CurrentDirectory {
            root: self.root().to_path_buf(),
            allowed_roots: self.validator.allowed_roots().to_vec(),
        }
    }

    /// Entries sorted directories first, then by name in byte order.
    #[instrument(skip(self, options))]
    pub fn list(&self, dir: &str, options: &ListOptions) -> Result<Vec<DirEntry>> {
        let use_cache = self.config.enable_cache && !options.with_stats;
        let record = self.begin(OperationKind::List, dir);
        let outcome = self.list_inner(dir, options.with_stats, use_cache);
        self.finish(record, outcome, |entries, record| {
            record
                .with_detail("count", entries.len())
                .with_detail("cached", use_cache)
        })
    }

    fn list_inner(&self, dir: &str, with_stats: bool, use_cache: bool) -> Result<Vec<DirEntry>> {
        let path = self.validator.validate(dir)?;
        let metadata = fs::metadata(&path).map_err(|err| SandboxError::from_io(err, &path))?;
        if !metadata.is_dir() {
            return Err(SandboxError::NotADirectory(path));
        }
        if !use_cache {
            return self.read_dir_direct(&path, with_stats);
        }

        let key = CacheKey::new(&path, LISTING_VARIANT);
        let cached = self.cache.lock().get(&key);
        if let Some(CachedPayload::Listing(entries)) = cached {
            debug!(path = %path.display(), "listing served from cache");
            return Ok(entries);
        }

        let source = Fingerprint::from_metadata(&metadata);
        let entries = self.read_dir_direct(&path, false)?;
        self.store(key, source, CachedPayload::Listing(entries.clone()));
        Ok(entries)
    }

    fn read_dir_direct(&self, dir: &Path, with_stats: bool) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for item in fs::read_dir(dir).map_err(|err| SandboxError::from_io(err, dir))? {
            let item = item?;
            let full = item.path();
            let mut entry = DirEntry {
                name: item.file_name().to_string_lossy().into_owned(),
                kind: EntryKind::from_file_type(item.file_type()?),
                path: full.strip_prefix(self.root()).unwrap_or(&full).to_path_buf(),
                size: None,
                modified: None,
                created: None,
                permissions: None,
            };
            if with_stats {
                // Entries can vanish between readdir and stat; keep them without stats.
                if let Ok(metadata) = fs::metadata(&full) {
                    entry.size = Some(metadata.len());
                    entry.modified = metadata.modified().ok().map(to_utc);
                    entry.created = metadata.created().ok().map(to_utc);
                    entry.permissions = Some(permission_string(&metadata));
                }
            }
            entries.push(entry);
        }
        sort_entries(&mut entries);
        Ok(entries)
    }

    #[instrument(skip(self, options), fields(encoding = options.encoding.label()))]
    pub fn read(&self, file: &str, options: &ReadOptions) -> Result<FileContent> {
        let record = self.begin(OperationKind::Read, file);
        let outcome = self.read_inner(file, options);
        self.finish(record, outcome, |read, record| {
            record
                .with_detail("size", read.size)
                .with_detail("encoding", options.encoding.label())
                .with_detail("cached", read.from_cache)
        })
        .map(|read| read.content)
    }

    /// Shorthand for a UTF-8 read.
    pub fn read_to_string(&self, file: &str) -> Result<String> {
        match self.read(file, &ReadOptions::default())? {
            FileContent::Utf8(text) => Ok(text),
            other => Err(SandboxError::InvalidOperation(format!(
                "unexpected content encoding: {other:?}"
            ))),
        }
    }

    fn read_inner(&self, file: &str, options: &ReadOptions) -> Result<ReadOutcome> {
        let path = self.validator.validate(file)?;
        let metadata = fs::metadata(&path).map_err(|err| SandboxError::from_io(err, &path))?;
        if metadata.is_dir() {
            return Err(SandboxError::InvalidOperation(format!(
                "'{file}' is a directory"
            )));
        }
        let size = metadata.len();
        if size > self.config.max_file_size {
            return Err(SandboxError::FileTooLarge {
                size,
                limit: self.config.max_file_size,
            });
        }

        let cacheable = self.config.enable_cache && size <= self.config.cacheable_file_size;
        if !cacheable {
            return Ok(ReadOutcome {
                content: read_direct(&path, options.encoding)?,
                size,
                from_cache: false,
            });
        }

        let key = CacheKey::new(&path, options.encoding.label());
        let cached = {
            let mut cache = self.cache.lock();
            if options.force_refresh {
                cache.invalidate(&key);
            }
            cache.get(&key)
        };
        if let Some(CachedPayload::Content(content)) = cached {
            return Ok(ReadOutcome {
                content,
                size,
                from_cache: true,
            });
        }

        let source = Fingerprint::from_metadata(&metadata);
        let content = read_direct(&path, options.encoding)?;
        self.store(key, source, CachedPayload::Content(content.clone()));
        Ok(ReadOutcome {
            content,
            size,
            from_cache: false,
        })
    }

    /// Replaces the whole file. Cached copies of the file and of its parent
    /// listing are dropped whether or not the write succeeds.
    #[instrument(skip(self, content, options), fields(size = content.as_ref().len()))]
    pub fn write(
        &self,
        file: &str,
        content: impl AsRef<[u8]>,
        options: &WriteOptions,
    ) -> Result<WriteResult> {
        let record = self.begin(OperationKind::Write, file);
        let outcome = self.write_inner(file, content.as_ref(), options);
        self.finish(record, outcome, |written, record| {
            info!(path = %file, bytes = written.bytes_written, "file written");
            record.with_detail("bytes_written", written.bytes_written)
        })
    }

    pub fn create_file(&self, file: &str) -> Result<WriteResult> {
        self.write(file, b"", &WriteOptions::default())
    }

    fn write_inner(&self, file: &str, data: &[u8], options: &WriteOptions) -> Result<WriteResult> {
        let path = self.validator.validate(file)?;
        let size = data.len() as u64;
        if size > self.config.max_file_size {
            return Err(SandboxError::FileTooLarge {
                size,
                limit: self.config.max_file_size,
            });
        }
        if options.create_parents {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| SandboxError::from_io(err, parent))?;
            }
        }

        let written = fs::write(&path, data);
        self.invalidate(&path, false);
        written.map_err(|err| SandboxError::from_io(err, &path))?;

        Ok(WriteResult {
            path: file.to_string(),
            bytes_written: size,
        })
    }

    #[instrument(skip(self, options), fields(recursive = options.recursive, backup = options.backup))]
    pub fn delete(&self, file: &str, options: &DeleteOptions) -> Result<DeleteResult> {
        let record = self
            .begin(OperationKind::Delete, file)
            .with_detail("deleted", false);
        let outcome = self.delete_inner(file, options);
        self.finish(record, outcome, |deleted, record| {
            info!(path = %file, "path deleted");
            let record = record.with_detail("deleted", deleted.deleted);
            match &deleted.backup_path {
                Some(backup) => record.with_detail("backup_path", backup.display().to_string()),
                None => record,
            }
        })
    }

    fn delete_inner(&self, file: &str, options: &DeleteOptions) -> Result<DeleteResult> {
        let path = self.validator.validate(file)?;
        if path == self.root() {
            return Err(SandboxError::InvalidOperation(
                "refusing to delete the sandbox root".to_string(),
            ));
        }
        let metadata =
            fs::symlink_metadata(&path).map_err(|err| SandboxError::from_io(err, &path))?;

        let mut backup_path = None;
        let removed = if metadata.is_dir() {
            if !options.recursive {
                return Err(SandboxError::InvalidOperation(format!(
                    "'{file}' is a directory; recursive delete required"
                )));
            }
            if options.backup {
                return Err(SandboxError::InvalidOperation(format!(
                    "'{file}' is a directory; backups are only kept for files"
                )));
            }
            fs::remove_dir_all(&path)
        } else {
            if options.backup {
                let backup = backup_path_for(&path);
                fs::copy(&path, &backup).map_err(|err| SandboxError::from_io(err, &path))?;
                backup_path = Some(backup);
            }
            fs::remove_file(&path)
        };
        self.invalidate(&path, metadata.is_dir());
        removed.map_err(|err| SandboxError::from_io(err, &path))?;

        Ok(DeleteResult {
            path: file.to_string(),
            deleted: true,
            backup_path,
        })
    }

    /// Metadata straight from disk; never cached.
    #[instrument(skip(self))]
    pub fn stat(&self, file: &str) -> Result<FileInfo> {
        let record = self.begin(OperationKind::Stat, file);
        let outcome = self.stat_inner(file);
        self.finish(record, outcome, |info, record| {
            record
                .with_detail("size", info.size)
                .with_detail("kind", format!("{:?}", info.kind).to_lowercase())
        })
    }

    fn stat_inner(&self, file: &str) -> Result<FileInfo> {
        let path = self.validator.validate(file)?;
        let metadata = fs::metadata(&path).map_err(|err| SandboxError::from_io(err, &path))?;
        let is_symlink = fs::symlink_metadata(&path)
            .map(|link| link.file_type().is_symlink())
            .unwrap_or(false);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(FileInfo {
            path: file.to_string(),
            name,
            kind: EntryKind::from_file_type(metadata.file_type()),
            size: metadata.len(),
            modified: metadata.modified().ok().map(to_utc),
            created: metadata.created().ok().map(to_utc),
            changed: change_time(&metadata),
            permissions: permission_string(&metadata),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            is_symlink,
        })
    }

    /// Returns a new instance rooted at `dir` (resolved against this root).
    /// The target must stay inside the allowed roots and be a directory. The
    /// new instance starts with an empty cache and audit log; this instance
    /// keeps its root and cache and records the change in its own log.
    #[instrument(skip(self))]
    pub fn change_root(&self, dir: &str) -> Result<(SandboxFs, RootChange)> {
        let record = self.begin(OperationKind::ChangeRoot, dir);
        let outcome = self.change_root_inner(dir);
        self.finish(record, outcome, |changed, record| {
            let change = &changed.1;
            info!(from = %change.from.display(), to = %change.to.display(), "sandbox root changed");
            record
                .with_detail("from", change.from.display().to_string())
                .with_detail("to", change.to.display().to_string())
        })
    }

    fn change_root_inner(&self, dir: &str) -> Result<(SandboxFs, RootChange)> {
        let target = self.validator.validate_root_change(dir)?;
        let metadata = fs::metadata(&target).map_err(|err| SandboxError::from_io(err, &target))?;
        if !metadata.is_dir() {
            return Err(SandboxError::NotADirectory(target));
        }

        let validator = self.validator.rebased(target.clone());
        let config = SandboxConfig {
            root: target.clone(),
            extra_roots: validator.allowed_roots().to_vec(),
            ..self.config.clone()
        };
        let scoped = SandboxFs {
            cache: Mutex::new(ContentAwareCache::new(config.cache)),
            audit: Mutex::new(AuditLog::new(config.audit_capacity)),
            validator,
            config,
        };
        let change = RootChange {
            from: self.root().to_path_buf(),
            to: target,
        };
        Ok((scoped, change))
    }

    /// Matches entry names under `search_root`. Results are never cached.
    #[instrument(skip(self, options), fields(mode = ?options.mode, recursive = options.recursive))]
    pub fn search(
        &self,
        pattern: &str,
        search_root: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchMatch>> {
        let record = self
            .begin(OperationKind::Search, search_root)
            .with_detail("pattern", pattern)
            .with_detail("recursive", options.recursive);
        let outcome = self.search_inner(pattern, search_root, options);
        self.finish(record, outcome, |matches, record| {
            record.with_detail("results", matches.len())
        })
    }

    fn search_inner(
        &self,
        pattern: &str,
        search_root: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchMatch>> {
        let path = self.validator.validate(search_root)?;
        let metadata = fs::metadata(&path).map_err(|err| SandboxError::from_io(err, &path))?;
        if !metadata.is_dir() {
            return Err(SandboxError::NotADirectory(path));
        }
        let matcher = search::compile(pattern, options.mode, options.case_sensitive)?;
        let skip_dirs = options
            .skip_dirs
            .as_deref()
            .unwrap_or(&self.config.search_skip_dirs);
        search::walk(&path, &matcher, options.recursive, skip_dirs)
    }

    /// The last `limit` audit records, oldest first.
    pub fn operation_log(&self, limit: usize) -> Vec<AuditRecord> {
        self.audit.lock().recent(limit)
    }

    pub fn clear_operation_log(&self) {
        self.audit.lock().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        if !self.config.enable_cache {
            return CacheStats::disabled();
        }
        self.cache.lock().stats()
    }

    /// Returns `false` when caching is disabled for this instance.
    pub fn clear_cache(&self) -> bool {
        if !self.config.enable_cache {
            return false;
        }
        self.cache.lock().clear();
        true
    }

    fn begin(&self, operation: OperationKind, target: &str) -> AuditRecord {
        AuditRecord::new(operation, target, self.root().to_path_buf())
    }

    fn finish<T>(
        &self,
        record: AuditRecord,
        outcome: Result<T>,
        on_success: impl FnOnce(&T, AuditRecord) -> AuditRecord,
    ) -> Result<T> {
        match outcome {
            Ok(value) => {
                let record = on_success(&value, record);
                self.audit.lock().append(record);
                Ok(value)
            }
            Err(err) => {
                if err.is_validation() {
                    warn!(operation = %record.operation, target = %record.target, error = %err, "path rejected");
                } else {
                    debug!(operation = %record.operation, target = %record.target, error = %err, "operation failed");
                }
                self.audit.lock().append(record.failed(&err));
                Err(err)
            }
        }
    }

    fn store(&self, key: CacheKey, source: Fingerprint, payload: CachedPayload) {
        if let Err(err) = self.cache.lock().set(key, source, payload) {
            warn!(error = %err, "cache store failed; continuing uncached");
        }
    }

    fn invalidate(&self, path: &Path, subtree: bool) {
        let mut cache = self.cache.lock();
        if subtree {
            cache.invalidate_prefix(path);
        } else {
            cache.invalidate_path(path);
        }
        if let Some(parent) = path.parent() {
            cache.invalidate_path(parent);
        }
    }
}

struct ReadOutcome {
    content: FileContent,
    size: u64,
    from_cache: bool,
}

fn read_direct(path: &Path, encoding: Encoding) -> Result<FileContent> {
    let bytes = fs::read(path).map_err(|err| SandboxError::from_io(err, path))?;
    FileContent::encode(bytes, encoding)
}

pub(crate) fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| {
        b.kind
            .is_dir()
            .cmp(&a.kind.is_dir())
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".deleted-{}", Utc::now().timestamp_millis()));
    PathBuf::from(name)
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(unix)]
fn permission_string(metadata: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:03o}", metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permission_string(metadata: &Metadata) -> String {
    if metadata.permissions().readonly() {
        "444".to_string()
    } else {
        "644".to_string()
    }
}

#[cfg(unix)]
fn change_time(metadata: &Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;
    DateTime::<Utc>::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32)
}

#[cfg(not(unix))]
fn change_time(_metadata: &Metadata) -> Option<DateTime<Utc>> {
    None
}
