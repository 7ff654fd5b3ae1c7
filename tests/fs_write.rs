use anyhow::Result;
use fs_sandbox::errors::SandboxError;
use fs_sandbox::{ListOptions, SandboxConfig, SandboxFs, WriteOptions};
use integration_tests::support::temp_workspace;

#[test]
fn writes_and_lists_files() -> Result<()> {
    let workspace = temp_workspace()?;
    let fs = SandboxFs::new(SandboxConfig::new(workspace.path().join("project"))?);

    fs.write("src/main.rs", b"fn main() {}\n", &WriteOptions::default())?;
    fs.write("README.md", b"fs-sandbox", &WriteOptions::default())?;

    let contents = fs.read_to_string("src/main.rs")?;
    assert_eq!(contents, "fn main() {}\n");

    let entries = fs.list(".", &ListOptions::default())?;
    let names: Vec<_> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["src", "README.md"]);

    Ok(())
}

#[test]
fn rejects_oversized_payloads() -> Result<()> {
    let workspace = temp_workspace()?;
    let fs = SandboxFs::new(SandboxConfig::new(workspace.path())?.with_max_file_size(16));

    let result = fs.write("big.bin", vec![0_u8; 32], &WriteOptions::default());
    match result {
        Err(SandboxError::FileTooLarge { size, limit }) => {
            assert!(size > 16);
            assert_eq!(limit, 16);
        }
        other => panic!("expected size error, got {:?}", other),
    }

    Ok(())
}

#[test]
fn rejects_relative_root() -> Result<()> {
    let err = SandboxConfig::new("relative/root").unwrap_err();
    assert!(matches!(err, SandboxError::InvalidOperation(_)));
    Ok(())
}
