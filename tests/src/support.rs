use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tempfile::{tempdir, TempDir};

pub fn temp_workspace() -> Result<TempDir> {
    Ok(tempdir()?)
}

/// Pushes the modification time of `path` forward, the way an editor save
/// or a checkout would, without going through the sandbox.
pub fn bump_mtime(path: &Path, by: Duration) -> Result<()> {
    File::open(path)?.set_modified(SystemTime::now() + by)?;
    Ok(())
}
