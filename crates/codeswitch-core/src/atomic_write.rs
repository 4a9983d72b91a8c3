//! Crash-safe file replacement
//!
//! Every mutable file CodeSwitch owns (settings, provider lists, download resume
//! state, pending-update markers) goes through [`atomic_write`]. A concurrent
//! reader observes either the previous content or the complete new content,
//! never a torn mix.
//!
//! The sequence is: create the parent directory, create a uniquely named temp
//! file next to the destination, write, set permissions, fsync, close, then
//! rename over the destination. Any failure before the rename removes the temp
//! file and leaves the destination untouched.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use tracing::debug;

/// Total rename attempts when the destination is locked by another process
const RENAME_ATTEMPTS: u32 = 3;

/// Delay between rename attempts
const RENAME_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Windows ERROR_SHARING_VIOLATION
#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;

/// Stage of an atomic write, reported on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    CreateDir,
    CreateTemp,
    Write,
    Permissions,
    Sync,
    Close,
    Rename,
}

impl WriteStage {
    /// All stages in execution order
    pub const ALL: [WriteStage; 7] = [
        WriteStage::CreateDir,
        WriteStage::CreateTemp,
        WriteStage::Write,
        WriteStage::Permissions,
        WriteStage::Sync,
        WriteStage::Close,
        WriteStage::Rename,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStage::CreateDir => "create-dir",
            WriteStage::CreateTemp => "create-temp",
            WriteStage::Write => "write",
            WriteStage::Permissions => "permissions",
            WriteStage::Sync => "sync",
            WriteStage::Close => "close",
            WriteStage::Rename => "rename",
        }
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically replace `path` with `bytes`.
///
/// `mode` carries unix permission bits. On Windows only the owner-write bit is
/// honoured (cleared means read-only).
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8], mode: u32) -> Result<()> {
    write_with_hook(path.as_ref(), bytes, mode, &mut |_| Ok(()))
}

/// Serialize `value` as pretty JSON and atomically write it with mode 0644
pub fn write_json_atomic<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes, 0o644)
}

/// Write with a hook invoked before each stage. A hook error aborts the write
/// at that stage exactly as a real I/O failure would.
fn write_with_hook(
    path: &Path,
    bytes: &[u8],
    mode: u32,
    hook: &mut dyn FnMut(WriteStage) -> io::Result<()>,
) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let fail = |stage: WriteStage, err: io::Error| Error::atomic_write(stage, path, err);

    hook(WriteStage::CreateDir)
        .and_then(|_| fs::create_dir_all(dir))
        .map_err(|e| fail(WriteStage::CreateDir, e))?;

    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "atomic".to_string())
    );
    let mut tmp = hook(WriteStage::CreateTemp)
        .and_then(|_| {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".tmp")
                .tempfile_in(dir)
        })
        .map_err(|e| fail(WriteStage::CreateTemp, e))?;

    // From here on, returning early drops `tmp`, which deletes the temp file.
    hook(WriteStage::Write)
        .and_then(|_| tmp.write_all(bytes))
        .map_err(|e| fail(WriteStage::Write, e))?;

    hook(WriteStage::Permissions)
        .and_then(|_| set_mode(tmp.as_file(), mode))
        .map_err(|e| fail(WriteStage::Permissions, e))?;

    hook(WriteStage::Sync)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| fail(WriteStage::Sync, e))?;

    hook(WriteStage::Close).map_err(|e| fail(WriteStage::Close, e))?;
    let temp_path = tmp.into_temp_path();

    persist_with_retry(temp_path, path, hook)
}

fn persist_with_retry(
    mut temp: TempPath,
    dest: &Path,
    hook: &mut dyn FnMut(WriteStage) -> io::Result<()>,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        hook(WriteStage::Rename).map_err(|e| Error::atomic_write(WriteStage::Rename, dest, e))?;

        match temp.persist(dest) {
            Ok(()) => return Ok(()),
            Err(err) if is_sharing_violation(&err.error) && attempt < RENAME_ATTEMPTS => {
                debug!(
                    "Destination {:?} is locked, retrying rename ({}/{})",
                    dest, attempt, RENAME_ATTEMPTS
                );
                temp = err.path;
                attempt += 1;
                std::thread::sleep(RENAME_RETRY_DELAY);
            }
            Err(err) => return Err(Error::atomic_write(WriteStage::Rename, dest, err.error)),
        }
    }
}

#[cfg(windows)]
fn is_sharing_violation(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ERROR_SHARING_VIOLATION)
}

#[cfg(not(windows))]
fn is_sharing_violation(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    let mut perms = file.metadata()?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    file.set_permissions(perms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_write_creates_file_and_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/deeper/settings.json");

        atomic_write(&path, b"{\"a\":1}", 0o644).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{\"a\":1}");
        assert_eq!(dir_entries(path.parent().unwrap()), vec!["settings.json"]);
    }

    #[test]
    fn test_write_replaces_existing_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("providers.json");
        fs::write(&path, b"old content that is longer").unwrap();

        atomic_write(&path, b"new", 0o644).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_every_failure_stage_leaves_destination_and_no_temp() {
        for stage in WriteStage::ALL {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("state.json");
            fs::write(&path, b"previous").unwrap();

            let mut hook = |current: WriteStage| {
                if current == stage {
                    Err(io::Error::other("injected"))
                } else {
                    Ok(())
                }
            };
            let err = write_with_hook(&path, b"replacement", 0o644, &mut hook).unwrap_err();

            assert_eq!(err.write_stage(), Some(stage), "stage {}", stage);
            assert_eq!(fs::read(&path).unwrap(), b"previous", "stage {}", stage);
            assert_eq!(dir_entries(temp.path()), vec!["state.json"], "stage {}", stage);
        }
    }

    #[test]
    fn test_failure_without_existing_destination_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("marker.json");

        let mut hook = |stage: WriteStage| {
            if stage == WriteStage::Sync {
                Err(io::Error::other("disk full"))
            } else {
                Ok(())
            }
        };
        let err = write_with_hook(&path, b"data", 0o644, &mut hook).unwrap_err();

        assert!(err.to_string().contains("sync"));
        assert!(!path.exists());
        assert!(dir_entries(temp.path()).is_empty());
    }

    #[test]
    fn test_write_json_atomic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("value.json");

        write_json_atomic(&path, &serde_json::json!({ "version": "v1.2.0" })).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["version"], "v1.2.0");
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_applied() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("update.sh");

        atomic_write(&path, b"#!/bin/bash\n", 0o755).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(WriteStage::CreateTemp.to_string(), "create-temp");
        assert_eq!(WriteStage::Rename.to_string(), "rename");
    }
}
