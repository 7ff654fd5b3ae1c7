use std::fs;
use std::path::PathBuf;

use fs_sandbox::{EntryKind, SandboxConfig, SandboxError, SandboxFs, SearchOptions};
use tempfile::TempDir;

fn project() -> (TempDir, SandboxFs) {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("src/util")).unwrap();
    fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
    fs::write(root.join("app.js"), "app").unwrap();
    fs::write(root.join("README.md"), "readme").unwrap();
    fs::write(root.join("src/index.js"), "index").unwrap();
    fs::write(root.join("src/util/helpers.js"), "helpers").unwrap();
    fs::write(root.join("node_modules/pkg/dep.js"), "dep").unwrap();
    let sandbox = SandboxFs::new(SandboxConfig::new(root).unwrap());
    (temp, sandbox)
}

fn names(matches: &[fs_sandbox::SearchMatch]) -> Vec<String> {
    matches.iter().map(|m| m.path.display().to_string()).collect()
}

#[test]
fn non_recursive_glob_only_sees_direct_children() {
    let (_temp, fs) = project();
    let matches = fs
        .search("*.js", ".", &SearchOptions::default().with_recursive(false))
        .unwrap();
    assert_eq!(names(&matches), vec!["app.js"]);
    assert_eq!(matches[0].kind, EntryKind::File);
    assert_eq!(matches[0].full_path, fs.root().join("app.js"));
}

#[test]
fn recursive_glob_skips_dependency_directories() {
    let (_temp, fs) = project();
    let matches = fs.search("*.js", ".", &SearchOptions::default()).unwrap();
    assert_eq!(
        names(&matches),
        vec!["app.js", "src/index.js", "src/util/helpers.js"]
    );
}

#[test]
fn skipped_directory_can_still_match_by_name() {
    let (_temp, fs) = project();
    let matches = fs
        .search("node_*", ".", &SearchOptions::default())
        .unwrap();
    assert_eq!(names(&matches), vec!["node_modules"]);
    assert_eq!(matches[0].kind, EntryKind::Directory);
}

#[test]
fn skip_list_can_be_overridden() {
    let (_temp, fs) = project();
    let matches = fs
        .search(
            "dep.js",
            ".",
            &SearchOptions::default().with_skip_dirs(vec!["src".to_string()]),
        )
        .unwrap();
    assert_eq!(names(&matches), vec!["node_modules/pkg/dep.js"]);

    let none = fs
        .search(
            "helpers.js",
            ".",
            &SearchOptions::default().with_skip_dirs(vec!["src".to_string()]),
        )
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn regex_mode_and_case_sensitivity() {
    let (_temp, fs) = project();
    let matches = fs
        .search(r"^(index|helpers)\.js$", "src", &SearchOptions::regex())
        .unwrap();
    assert_eq!(names(&matches), vec!["index.js", "util/helpers.js"]);

    let insensitive = fs
        .search("readme.MD", ".", &SearchOptions::default())
        .unwrap();
    assert_eq!(insensitive.len(), 1);
    let sensitive = fs
        .search(
            "readme.MD",
            ".",
            &SearchOptions::default().with_case_sensitive(true),
        )
        .unwrap();
    assert!(sensitive.is_empty());
}

#[test]
fn glob_with_dots_is_not_treated_as_regex() {
    let (_temp, fs) = project();
    fs::write(fs.root().join("file.name.txt"), "x").unwrap();
    fs::write(fs.root().join("fileXname.txt"), "x").unwrap();

    let matches = fs
        .search("file.name.*", ".", &SearchOptions::default())
        .unwrap();
    assert_eq!(
        matches.iter().map(|m| m.path.clone()).collect::<Vec<_>>(),
        vec![PathBuf::from("file.name.txt")]
    );
}

#[test]
fn search_errors() {
    let (_temp, fs) = project();
    let err = fs
        .search("*.js", "app.js", &SearchOptions::default())
        .unwrap_err();
    assert!(matches!(err, SandboxError::NotADirectory(_)));

    let err = fs
        .search("(", ".", &SearchOptions::regex())
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidPattern(_)));

    let log = fs.operation_log(2);
    assert!(log.iter().all(|record| !record.success));
    assert_eq!(log[1].detail("pattern"), Some(&serde_json::json!("(")));
}
