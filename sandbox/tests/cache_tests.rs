use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use fs_sandbox::{
    CacheConfig, DeleteOptions, ListOptions, ReadOptions, SandboxConfig, SandboxError, SandboxFs,
    WriteOptions,
};
use tempfile::TempDir;

fn sandbox(temp: &TempDir) -> SandboxFs {
    SandboxFs::new(SandboxConfig::new(temp.path()).unwrap())
}

fn touch_forward(path: &Path, secs: u64) {
    // read-only handle so directories work too; the owner may set times
    File::open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn second_read_is_served_from_cache() {
    let temp = TempDir::new().unwrap();
    let fs = sandbox(&temp);
    fs.write("cached.txt", b"stable", &WriteOptions::default())
        .unwrap();

    let first = fs.read_to_string("cached.txt").unwrap();
    let second = fs.read_to_string("cached.txt").unwrap();
    assert_eq!(first, second);

    let stats = fs.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
    assert!(stats.enabled);
}

#[test]
fn external_edit_is_visible_on_next_read() {
    let temp = TempDir::new().unwrap();
    let fs = sandbox(&temp);
    fs.write("edited.txt", b"before", &WriteOptions::default())
        .unwrap();
    assert_eq!(fs.read_to_string("edited.txt").unwrap(), "before");

    // same length, so only the mtime can give the change away
    let path = temp.path().join("edited.txt");
    fs::write(&path, b"after!").unwrap();
    touch_forward(&path, 60);

    assert_eq!(fs.read_to_string("edited.txt").unwrap(), "after!");
    assert_eq!(fs.cache_stats().hits, 0);
}

#[test]
fn write_through_sandbox_invalidates_cache() {
    let temp = TempDir::new().unwrap();
    let fs = sandbox(&temp);
    fs.write("note.txt", b"one", &WriteOptions::default()).unwrap();
    fs.read_to_string("note.txt").unwrap();

    fs.write("note.txt", b"two", &WriteOptions::default()).unwrap();
    assert_eq!(fs.read_to_string("note.txt").unwrap(), "two");
    assert_eq!(fs.cache_stats().hits, 0);
}

#[test]
fn delete_never_returns_stale_content() {
    let temp = TempDir::new().unwrap();
    let fs = sandbox(&temp);
    fs.write("gone.txt", b"a", &WriteOptions::default()).unwrap();
    assert_eq!(fs.read_to_string("gone.txt").unwrap(), "a");

    fs.delete("gone.txt", &DeleteOptions::default()).unwrap();
    let err = fs.read("gone.txt", &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, SandboxError::NotFound(_)));
}

#[test]
fn listing_cache_follows_directory_changes() {
    let temp = TempDir::new().unwrap();
    let fs = sandbox(&temp);
    fs.write("dir/one.txt", b"1", &WriteOptions::default()).unwrap();

    assert_eq!(fs.list("dir", &ListOptions::default()).unwrap().len(), 1);
    assert_eq!(fs.list("dir", &ListOptions::default()).unwrap().len(), 1);
    assert_eq!(fs.cache_stats().hits, 1);

    // created behind the sandbox's back
    fs::write(temp.path().join("dir/two.txt"), b"2").unwrap();
    touch_forward(&temp.path().join("dir"), 60);
    let names: Vec<_> = fs
        .list("dir", &ListOptions::default())
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["one.txt", "two.txt"]);
}

#[test]
fn force_refresh_bypasses_cached_copy() {
    let temp = TempDir::new().unwrap();
    let fs = sandbox(&temp);
    fs.write("f.txt", b"x", &WriteOptions::default()).unwrap();
    fs.read_to_string("f.txt").unwrap();

    let options = ReadOptions {
        force_refresh: true,
        ..ReadOptions::default()
    };
    fs.read("f.txt", &options).unwrap();
    assert_eq!(fs.cache_stats().hits, 0);
    assert_eq!(fs.cache_stats().misses, 2);
}

#[test]
fn files_over_cacheable_size_bypass_cache() {
    let temp = TempDir::new().unwrap();
    let fs = SandboxFs::new(
        SandboxConfig::new(temp.path())
            .unwrap()
            .with_cacheable_file_size(8),
    );
    fs.write("big.txt", b"0123456789", &WriteOptions::default())
        .unwrap();
    fs.read_to_string("big.txt").unwrap();
    fs.read_to_string("big.txt").unwrap();

    let stats = fs.cache_stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.hits + stats.misses, 0);
    let last = fs.operation_log(1).pop().unwrap();
    assert_eq!(last.detail("cached"), Some(&serde_json::Value::Bool(false)));
}

#[test]
fn entry_bound_holds_with_least_recent_evicted() {
    let temp = TempDir::new().unwrap();
    let fs = SandboxFs::new(
        SandboxConfig::new(temp.path())
            .unwrap()
            .with_cache(CacheConfig::content_aware().with_max_entries(3)),
    );
    for name in ["a", "b", "c", "d"] {
        fs.write(name, name.as_bytes(), &WriteOptions::default()).unwrap();
    }
    for name in ["a", "b", "c"] {
        fs.read_to_string(name).unwrap();
    }
    fs.read_to_string("a").unwrap(); // "b" is now the least recently used
    fs.read_to_string("d").unwrap();
    assert_eq!(fs.cache_stats().entries, 3);

    let hits_before = fs.cache_stats().hits;
    fs.read_to_string("b").unwrap();
    assert_eq!(fs.cache_stats().hits, hits_before);
    fs.read_to_string("d").unwrap();
    assert_eq!(fs.cache_stats().hits, hits_before + 1);
}

#[test]
fn disabled_cache_reports_and_refuses() {
    let temp = TempDir::new().unwrap();
    let fs = SandboxFs::new(
        SandboxConfig::new(temp.path())
            .unwrap()
            .with_cache_enabled(false),
    );
    fs.write("x.txt", b"x", &WriteOptions::default()).unwrap();
    fs.read_to_string("x.txt").unwrap();
    fs.read_to_string("x.txt").unwrap();

    let stats = fs.cache_stats();
    assert!(!stats.enabled);
    assert_eq!(stats.hits, 0);
    assert!(!fs.clear_cache());
}

#[test]
fn clear_cache_resets_everything() {
    let temp = TempDir::new().unwrap();
    let fs = sandbox(&temp);
    fs.write("x.txt", b"x", &WriteOptions::default()).unwrap();
    fs.read_to_string("x.txt").unwrap();
    fs.read_to_string("x.txt").unwrap();

    assert!(fs.clear_cache());
    let stats = fs.cache_stats();
    assert_eq!((stats.entries, stats.hits, stats.misses), (0, 0, 0));
}

#[test]
fn huge_ttl_does_not_break_cached_reads() {
    let temp = TempDir::new().unwrap();
    let fs = SandboxFs::new(
        SandboxConfig::new(temp.path())
            .unwrap()
            .with_cache(CacheConfig::content_aware().with_ttl(Duration::from_secs(u64::MAX))),
    );
    fs.write("long.txt", b"lived", &WriteOptions::default()).unwrap();

    assert_eq!(fs.read_to_string("long.txt").unwrap(), "lived");
    assert_eq!(fs.read_to_string("long.txt").unwrap(), "lived");
    assert_eq!(fs.cache_stats().hits, 1);
}

#[test]
fn cache_failure_falls_back_to_direct_read() {
    let temp = TempDir::new().unwrap();
    let fs = sandbox(&temp);
    fs.write("ancient.txt", b"ancient", &WriteOptions::default())
        .unwrap();
    // a pre-epoch mtime cannot be serialized, so storing the entry fails
    File::open(temp.path().join("ancient.txt"))
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH - Duration::from_secs(86_400))
        .unwrap();

    assert_eq!(fs.read_to_string("ancient.txt").unwrap(), "ancient");
    assert_eq!(fs.read_to_string("ancient.txt").unwrap(), "ancient");

    let stats = fs.cache_stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);
    assert!(fs.operation_log(2).iter().all(|record| record.success));
}
