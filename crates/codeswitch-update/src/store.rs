//! On-disk layout of the update data directory
//!
//! ```text
//! ~/.code-switch/update/
//! ├── downloads/              # partial and verified artifacts
//! │   └── extracted/          # unpacked bundles
//! ├── download_state.json     # resume checkpoint
//! ├── pending_apply.json      # handover marker for the next start
//! ├── dismissed_version.txt
//! └── update.sh | update.ps1  # installer helper
//! ```
//!
//! Every write goes through the atomic writer.

use crate::error::Result;
use crate::state::{DownloadState, PendingApply};
use codeswitch_core::{atomic_write, write_json_atomic};
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DOWNLOADS_DIR: &str = "downloads";
pub const EXTRACTED_DIR: &str = "extracted";
pub const DOWNLOAD_STATE_FILE: &str = "download_state.json";
pub const PENDING_APPLY_FILE: &str = "pending_apply.json";
pub const DISMISSED_VERSION_FILE: &str = "dismissed_version.txt";

/// Persisted files owned by the update engine
#[derive(Debug, Clone)]
pub struct UpdateStore {
    data_dir: PathBuf,
}

impl UpdateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join(DOWNLOADS_DIR)
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.downloads_dir().join(EXTRACTED_DIR)
    }

    pub fn download_state_path(&self) -> PathBuf {
        self.data_dir.join(DOWNLOAD_STATE_FILE)
    }

    pub fn pending_apply_path(&self) -> PathBuf {
        self.data_dir.join(PENDING_APPLY_FILE)
    }

    pub fn dismissed_version_path(&self) -> PathBuf {
        self.data_dir.join(DISMISSED_VERSION_FILE)
    }

    /// Path for a helper script such as `update.sh`
    pub fn script_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    pub fn load_dismissed_version(&self) -> Option<String> {
        let content = fs::read_to_string(self.dismissed_version_path()).ok()?;
        let version = content.trim();
        if version.is_empty() {
            None
        } else {
            Some(version.to_string())
        }
    }

    pub fn save_dismissed_version(&self, version: &str) -> Result<()> {
        atomic_write(self.dismissed_version_path(), version.trim().as_bytes(), 0o644)?;
        Ok(())
    }

    /// Load the resume checkpoint. A corrupt file is treated as absent.
    pub fn load_download_state(&self) -> Option<DownloadState> {
        self.load_json(&self.download_state_path(), false)
    }

    pub fn save_download_state(&self, state: &DownloadState) -> Result<()> {
        write_json_atomic(self.download_state_path(), state)?;
        Ok(())
    }

    pub fn clear_download_state(&self) {
        remove_path(&self.download_state_path());
    }

    /// Load the handover marker. A corrupt marker is deleted.
    pub fn load_pending_apply(&self) -> Option<PendingApply> {
        self.load_json(&self.pending_apply_path(), true)
    }

    pub fn save_pending_apply(&self, pending: &PendingApply) -> Result<()> {
        write_json_atomic(self.pending_apply_path(), pending)?;
        Ok(())
    }

    pub fn clear_pending_apply(&self) {
        remove_path(&self.pending_apply_path());
    }

    /// Remove every downloaded artifact and extracted bundle
    pub fn clear_downloads(&self) {
        remove_path(&self.downloads_dir());
    }

    fn load_json<T: DeserializeOwned>(&self, path: &Path, delete_corrupt: bool) -> Option<T> {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_slice(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring corrupt {:?}: {}", path, e);
                if delete_corrupt {
                    remove_path(path);
                }
                None
            }
        }
    }
}

/// Remove a file or directory tree, ignoring a missing path
pub fn remove_path(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!("Removed {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}
