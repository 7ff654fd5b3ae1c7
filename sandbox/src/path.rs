use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::errors::{Result, SandboxError, ValidationError};

/// Characters that are commonly used to chain or substitute shell commands.
/// Paths accepted here may later be interpolated into commands by callers.
pub const FORBIDDEN_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>',
];

/// Symlink hops followed before a chain is treated as a loop.
const MAX_LINK_HOPS: usize = 40;

pub fn ensure_absolute_base(base_dir: &Path) -> Result<PathBuf> {
    if base_dir.is_relative() {
        return Err(SandboxError::InvalidOperation(
            "sandbox base directory must be absolute".to_string(),
        ));
    }
    Ok(base_dir.to_path_buf())
}

/// Resolves `requested` against `root` and refuses anything that is not a
/// descendant of (or equal to) `root`. `root` must already be canonical.
pub fn validate(root: &Path, requested: &str) -> std::result::Result<PathBuf, ValidationError> {
    validate_within(root, requested, std::slice::from_ref(&root.to_path_buf()))
}

/// Like [`validate`], but the resolved path only has to land inside one of
/// `allowed`. Used when the effective root moves inside a larger allowed set.
pub fn validate_within(
    root: &Path,
    requested: &str,
    allowed: &[PathBuf],
) -> std::result::Result<PathBuf, ValidationError> {
    check_input(requested)?;

    let candidate = normalize(&root.join(requested));
    if !is_contained(&candidate, allowed) {
        let traversal = Path::new(requested)
            .components()
            .any(|component| matches!(component, Component::ParentDir));
        return Err(if traversal && Path::new(requested).is_relative() {
            ValidationError::PathTraversal(requested.to_string())
        } else {
            ValidationError::OutsideRoot(requested.to_string())
        });
    }

    // Symlinked ancestors must not lead out of the sandbox either.
    match real_location(&candidate) {
        Some(real) if is_contained(&real, allowed) => Ok(candidate),
        _ => Err(ValidationError::OutsideRoot(requested.to_string())),
    }
}

/// Where `path` lands on disk once every symlink along it is followed. The
/// part below the deepest existing ancestor is kept as-is. Dangling links are
/// followed by hand so a missing target still has a location. `None` when the
/// link chain cannot be resolved.
fn real_location(path: &Path) -> Option<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        let Some(existing) = current.ancestors().find(|p| p.symlink_metadata().is_ok()) else {
            return Some(current);
        };
        let rest = current.strip_prefix(existing).ok()?.to_path_buf();
        if let Ok(real) = fs::canonicalize(existing) {
            return Some(real.join(rest));
        }
        let target = fs::read_link(existing).ok()?;
        let base = existing.parent().unwrap_or(existing);
        current = normalize(&base.join(target)).join(rest);
    }
    None
}

fn check_input(requested: &str) -> std::result::Result<(), ValidationError> {
    if requested.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    if requested.contains('\0') {
        return Err(ValidationError::NullByte);
    }
    if let Some(ch) = requested.chars().find(|ch| FORBIDDEN_CHARS.contains(ch)) {
        return Err(ValidationError::InjectionCharacter(ch));
    }
    Ok(())
}

/// Lexically resolves `.` and `..` segments. Never touches the disk.
pub fn normalize(path: &Path) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => clean.push(prefix.as_os_str()),
            Component::RootDir => clean.push(Component::RootDir.as_os_str()),
            Component::CurDir => continue,
            Component::ParentDir => {
                clean.pop();
            }
            Component::Normal(part) => clean.push(part),
        }
    }
    clean
}

/// Segment-wise containment: `/srv/root-evil` is not inside `/srv/root`.
pub fn is_contained(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// The sandbox's view of which directories may be touched.
#[derive(Clone, Debug)]
pub struct PathValidator {
    root: PathBuf,
    allowed_roots: Vec<PathBuf>,
}

impl PathValidator {
    pub fn new(root: PathBuf) -> Self {
        Self {
            allowed_roots: vec![root.clone()],
            root,
        }
    }

    pub fn with_allowed_roots(root: PathBuf, allowed_roots: Vec<PathBuf>) -> Self {
        let mut allowed = allowed_roots;
        if !is_contained(&root, &allowed) {
            allowed.push(root.clone());
        }
        Self {
            root,
            allowed_roots: allowed,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    /// Every disk-touching operation goes through here first.
    pub fn validate(&self, requested: &str) -> std::result::Result<PathBuf, ValidationError> {
        validate(&self.root, requested)
    }

    /// Candidate root for a directory change: resolved against the current
    /// root, but only required to stay inside the allowed set.
    pub fn validate_root_change(
        &self,
        requested: &str,
    ) -> std::result::Result<PathBuf, ValidationError> {
        validate_within(&self.root, requested, &self.allowed_roots)
    }

    /// Validator for a new effective root that keeps the same allowed set.
    pub fn rebased(&self, root: PathBuf) -> Self {
        Self {
            root,
            allowed_roots: self.allowed_roots.clone(),
        }
    }
}
