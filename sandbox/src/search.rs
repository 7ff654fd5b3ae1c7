use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use walkdir::WalkDir;

use crate::errors::{Result, SandboxError};
use crate::fs::EntryKind;

/// How a search pattern is interpreted. Always chosen by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Glob,
    Regex,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub recursive: bool,
    pub case_sensitive: bool,
    /// Overrides the configured skip-list when set.
    pub skip_dirs: Option<Vec<String>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Glob,
            recursive: true,
            case_sensitive: false,
            skip_dirs: None,
        }
    }
}

impl SearchOptions {
    pub fn regex() -> Self {
        Self {
            mode: SearchMode::Regex,
            ..Self::default()
        }
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_skip_dirs(mut self, dirs: Vec<String>) -> Self {
        self.skip_dirs = Some(dirs);
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchMatch {
    pub name: String,
    /// Relative to the directory the search started from.
    pub path: PathBuf,
    pub kind: EntryKind,
    pub full_path: PathBuf,
}

/// Escapes every regex metacharacter, then maps `*` to `.*` and `?` to `.`.
pub fn glob_to_regex(glob: &str) -> String {
    let escaped = regex::escape(glob)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    format!("^{escaped}$")
}

pub fn compile(pattern: &str, mode: SearchMode, case_sensitive: bool) -> Result<Regex> {
    let source = match mode {
        SearchMode::Glob => glob_to_regex(pattern),
        SearchMode::Regex => pattern.to_string(),
    };
    RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|err| SandboxError::InvalidPattern(err.to_string()))
}

/// Walks `root` in name order, matching entry names against `matcher`.
/// Directories named in `skip_dirs` can match but are never descended into.
pub(crate) fn walk(
    root: &Path,
    matcher: &Regex,
    recursive: bool,
    skip_dirs: &[String],
) -> Result<Vec<SearchMatch>> {
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    let mut matches = Vec::new();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            match err.into_io_error() {
                Some(io) => SandboxError::from_io(io, &path),
                None => SandboxError::InvalidOperation(format!(
                    "filesystem loop detected at {}",
                    path.display()
                )),
            }
        })?;

        let name = entry.file_name().to_string_lossy().into_owned();
        let kind = EntryKind::from_file_type(entry.file_type());
        if matcher.is_match(&name) {
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            matches.push(SearchMatch {
                name: name.clone(),
                path: relative,
                kind,
                full_path: entry.path().to_path_buf(),
            });
        }

        if kind == EntryKind::Directory && skip_dirs.iter().any(|skip| *skip == name) {
            walker.skip_current_dir();
        }
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_translation_escapes_metacharacters() {
        assert_eq!(glob_to_regex("*.js"), r"^.*\.js$");
        assert_eq!(glob_to_regex("file?.rs"), r"^file.\.rs$");
        assert_eq!(glob_to_regex("a+b(c)"), r"^a\+b\(c\)$");
    }

    #[test]
    fn dotted_globs_stay_globs() {
        let re = compile("file.name.*", SearchMode::Glob, true).unwrap();
        assert!(re.is_match("file.name.txt"));
        assert!(!re.is_match("fileXname.txt"));
    }

    #[test]
    fn glob_matching_is_case_insensitive_by_default() {
        let re = compile("*.JS", SearchMode::Glob, false).unwrap();
        assert!(re.is_match("app.js"));
        let strict = compile("*.JS", SearchMode::Glob, true).unwrap();
        assert!(!strict.is_match("app.js"));
    }

    #[test]
    fn regex_mode_is_used_verbatim() {
        let re = compile(r"^test_\d+\.rs$", SearchMode::Regex, true).unwrap();
        assert!(re.is_match("test_42.rs"));
        assert!(!re.is_match("test_x.rs"));
    }

    #[test]
    fn invalid_regex_is_reported() {
        let err = compile("(unclosed", SearchMode::Regex, false).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPattern(_)));
    }
}
