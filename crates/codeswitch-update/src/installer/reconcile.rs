//! Startup reconciliation of the pending-apply marker

use crate::extract::{extract_bundle_blocking, ArchiveKind};
use crate::state::{PendingApply, ReadyArtifact, ReleaseSource, UpdateInfo};
use crate::store::{remove_path, UpdateStore};
use crate::verify::{digests_match, sha256_file};
use crate::version::has_reached;
use std::fs;
use tracing::{info, warn};

/// What the previous restart-and-apply cycle left behind
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// No marker on disk
    NoMarker,
    /// The running version is the target: the update was applied
    Applied { version: String },
    /// The helper did not finish, but the staged artifact is intact
    Restored {
        info: UpdateInfo,
        artifact: ReadyArtifact,
    },
    /// The helper did not finish and the artifact is gone or corrupt
    Discarded { version: String },
}

/// Inspect and consume `pending_apply.json`. Runs once at startup; the marker
/// is deleted in every branch.
pub fn reconcile_pending_apply(
    store: &UpdateStore,
    current_version: &str,
    buffer_size: usize,
) -> ReconcileOutcome {
    let Some(pending) = store.load_pending_apply() else {
        return ReconcileOutcome::NoMarker;
    };
    store.clear_pending_apply();

    if has_reached(current_version, &pending.target_version) {
        info!(
            "Update to {} was applied, cleaning up downloads",
            pending.target_version
        );
        discard_artifacts(&pending);
        store.clear_downloads();
        store.clear_download_state();
        return ReconcileOutcome::Applied {
            version: pending.target_version,
        };
    }

    match restore_artifact(store, &pending, buffer_size) {
        Some(artifact) => {
            info!(
                "Update to {} did not complete, staged download is intact",
                pending.target_version
            );
            let info = UpdateInfo {
                version: pending.target_version.clone(),
                pub_date: None,
                notes: String::new(),
                download_url: String::new(),
                sha256: artifact.sha256.clone(),
                size: artifact.size,
                source: ReleaseSource::Manifest,
            };
            ReconcileOutcome::Restored { info, artifact }
        }
        None => {
            warn!(
                "Update to {} did not complete and the staged download is unusable",
                pending.target_version
            );
            discard_artifacts(&pending);
            ReconcileOutcome::Discarded {
                version: pending.target_version,
            }
        }
    }
}

fn discard_artifacts(pending: &PendingApply) {
    remove_path(&pending.file_path);
    if let Some(payload) = &pending.payload_path {
        remove_path(payload);
    }
}

fn restore_artifact(
    store: &UpdateStore,
    pending: &PendingApply,
    buffer_size: usize,
) -> Option<ReadyArtifact> {
    if !pending.file_path.is_file() {
        return None;
    }

    let actual = match sha256_file(&pending.file_path, buffer_size) {
        Ok(digest) => digest,
        Err(e) => {
            warn!("Failed to hash {:?}: {}", pending.file_path, e);
            return None;
        }
    };
    if !digests_match(&pending.file_sha256, &actual) {
        warn!("Staged download {:?} no longer matches its checksum", pending.file_path);
        return None;
    }

    let payload_path = match &pending.payload_path {
        None => pending.file_path.clone(),
        Some(payload) if payload.exists() => payload.clone(),
        Some(_) => {
            let kind = ArchiveKind::from_path(&pending.file_path)?;
            match extract_bundle_blocking(&pending.file_path, kind, &store.extracted_dir()) {
                Ok(root) => root,
                Err(e) => {
                    warn!("Failed to re-extract {:?}: {}", pending.file_path, e);
                    return None;
                }
            }
        }
    };

    let size = fs::metadata(&pending.file_path).map(|m| m.len()).ok()?;
    Some(ReadyArtifact {
        archive_path: pending.file_path.clone(),
        payload_path,
        sha256: actual,
        size,
    })
}
