//! Release bundle extraction
//!
//! macOS builds ship as a zipped `.app` bundle; `.tar.gz` is accepted for
//! other bundle-style builds. Entries whose path would land outside the
//! extraction directory are rejected and the whole extraction fails. Bundles
//! carry relative symlinks (framework `Versions/Current`); those are kept as
//! long as they resolve inside the bundle.

use crate::error::{Result, UpdateError};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;
use zip::ZipArchive;

/// Bundle format, derived from the artifact's file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// `None` means the artifact is installed as-is
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Extract `archive` into a fresh `dest` on the blocking pool and return the
/// payload root inside it.
pub async fn extract_bundle(archive: PathBuf, kind: ArchiveKind, dest: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || extract_bundle_blocking(&archive, kind, &dest))
        .await
        .map_err(|e| UpdateError::Io(io::Error::other(e)))?
}

pub fn extract_bundle_blocking(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<PathBuf> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    debug!("Extracting {:?} into {:?}", archive, dest);
    match kind {
        ArchiveKind::Zip => extract_zip(archive, dest)?,
        ArchiveKind::TarGz => extract_tar_gz(archive, dest)?,
    }

    find_payload_root(dest)
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| UpdateError::archive(format!("failed to read zip: {}", e)))?;
    let root = fs::canonicalize(dest)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| UpdateError::archive(format!("failed to read zip entry {}: {}", i, e)))?;

        let name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| UpdateError::UnsafeArchivePath(name.clone()))?;

        if entry.is_dir() {
            create_dir_within(&root, &relative, &name)?;
            continue;
        }

        let file_name = relative
            .file_name()
            .ok_or_else(|| UpdateError::UnsafeArchivePath(name.clone()))?;
        let parent = create_dir_within(&root, relative.parent().unwrap_or(Path::new("")), &name)?;
        let out_path = parent.join(file_name);

        // Never write through a link left by an earlier entry
        if let Ok(meta) = fs::symlink_metadata(&out_path) {
            if meta.file_type().is_symlink() {
                fs::remove_file(&out_path)?;
            }
        }

        if entry.is_symlink() {
            let mut target = String::new();
            io::Read::read_to_string(&mut entry, &mut target)?;
            let target = PathBuf::from(target);
            let resolved = resolve_link_target(&root, &parent, &target).ok_or_else(|| {
                UpdateError::UnsafeArchivePath(format!("{} -> {}", name, target.display()))
            })?;
            link_entry(&out_path, &target, &resolved)?;
            continue;
        }

        let mut outfile = File::create(&out_path)?;
        io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }
    }

    Ok(())
}

/// Create `relative` under `root` one component at a time and return the real
/// directory. Links made by earlier entries are followed on disk and must land
/// inside `root`.
fn create_dir_within(root: &Path, relative: &Path, name: &str) -> Result<PathBuf> {
    let unsafe_path = || UpdateError::UnsafeArchivePath(name.to_string());
    let mut current = root.to_path_buf();

    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if current == root {
                    return Err(unsafe_path());
                }
                current.pop();
            }
            Component::Normal(part) => {
                current.push(part);
                match fs::symlink_metadata(&current) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        current = fs::canonicalize(&current).map_err(|_| unsafe_path())?;
                        if !current.starts_with(root) || !current.is_dir() {
                            return Err(unsafe_path());
                        }
                    }
                    Ok(meta) if meta.is_dir() => {}
                    Ok(_) => {
                        return Err(UpdateError::archive(format!(
                            "{}: {:?} is not a directory",
                            name, current
                        )))
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&current)?,
                    Err(e) => return Err(e.into()),
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(unsafe_path()),
        }
    }

    Ok(current)
}

/// Resolve a link target the way the OS will, starting from the link's real
/// parent directory. `None` if any step leaves `root`.
///
/// A `..` after a component that does not exist yet is refused: a later entry
/// could turn that component into a link and move where the `..` lands.
fn resolve_link_target(root: &Path, parent: &Path, target: &Path) -> Option<PathBuf> {
    let mut current = parent.to_path_buf();
    let mut unresolved = false;

    for component in target.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if unresolved || current == root {
                    return None;
                }
                current.pop();
            }
            Component::Normal(part) => {
                current.push(part);
                if unresolved {
                    continue;
                }
                match fs::symlink_metadata(&current) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        current = fs::canonicalize(&current).ok()?;
                    }
                    Ok(_) => {}
                    Err(_) => unresolved = true,
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
        if !current.starts_with(root) {
            return None;
        }
    }

    Some(current)
}

#[cfg(unix)]
fn link_entry(out_path: &Path, target: &Path, _resolved: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, out_path)
}

/// No symlink privilege on most Windows installs; copy the target instead.
#[cfg(not(unix))]
fn link_entry(out_path: &Path, _target: &Path, resolved: &Path) -> io::Result<()> {
    if resolved.is_file() {
        fs::copy(resolved, out_path)?;
    }
    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.display().to_string();
        // unpack_in refuses entries that would escape `dest`
        if !entry.unpack_in(dest)? {
            return Err(UpdateError::UnsafeArchivePath(name));
        }
    }

    Ok(())
}

/// The `.app` bundle if present, else the sole top-level entry, else `dest`
pub fn find_payload_root(dest: &Path) -> Result<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dest)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| !n.to_string_lossy().starts_with("__MACOSX"))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    if let Some(app) = entries
        .iter()
        .find(|p| p.is_dir() && p.extension().is_some_and(|ext| ext == "app"))
    {
        return Ok(app.clone());
    }

    match entries.as_slice() {
        [single] => Ok(single.clone()),
        [] => Err(UpdateError::archive("archive is empty")),
        _ => Ok(dest.to_path_buf()),
    }
}
