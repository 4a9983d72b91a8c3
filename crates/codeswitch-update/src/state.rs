//! Update lifecycle types: states, release info, persisted resume and apply markers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::platform::InstallPolicy;

/// Lifecycle state of the update engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateState {
    #[default]
    Idle,
    Checking,
    Available,
    Downloading,
    Ready,
    Applying,
    Error,
}

impl UpdateState {
    /// States in which a check must not disturb the current target
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UpdateState::Downloading | UpdateState::Ready | UpdateState::Applying
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::Available => "available",
            UpdateState::Downloading => "downloading",
            UpdateState::Ready => "ready",
            UpdateState::Applying => "applying",
            UpdateState::Error => "error",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation that put the engine into [`UpdateState::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorOp {
    Check,
    Download,
    Apply,
}

/// Where release information came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseSource {
    /// Static manifest, carries checksums
    #[default]
    Manifest,
    /// Release listing API, never carries checksums
    ReleaseApi,
}

/// A release newer than the running version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
    pub download_url: String,
    /// Lowercase hex SHA-256; empty when the source does not publish one
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub source: ReleaseSource,
}

impl UpdateInfo {
    /// Only manifest releases with a published digest are installed automatically
    pub fn can_auto_download(&self) -> bool {
        self.source == ReleaseSource::Manifest && !self.sha256.trim().is_empty()
    }
}

/// Resume checkpoint persisted as `download_state.json`
///
/// `downloaded_bytes` equals the length of `temp_file_path` whenever this is
/// written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    pub url: String,
    pub expected_sha256: String,
    pub expected_size: u64,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub last_modified: String,
    pub downloaded_bytes: u64,
    pub temp_file_path: PathBuf,
}

/// How the helper installs the update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMethod {
    /// Rename-swap the running binary or bundle
    Swap,
    /// Run the platform installer silently
    Installer,
}

impl From<InstallPolicy> for ApplyMethod {
    fn from(policy: InstallPolicy) -> Self {
        match policy {
            InstallPolicy::Portable => ApplyMethod::Swap,
            InstallPolicy::Installer => ApplyMethod::Installer,
        }
    }
}

impl fmt::Display for ApplyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyMethod::Swap => write!(f, "swap"),
            ApplyMethod::Installer => write!(f, "installer"),
        }
    }
}

/// Marker persisted as `pending_apply.json` right before the process exits to
/// hand over to the helper. Consumed at the next start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApply {
    pub target_version: String,
    pub method: ApplyMethod,
    pub file_path: PathBuf,
    pub file_sha256: String,
    pub started_at: DateTime<Utc>,
    /// Extracted bundle root, when the artifact was an archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_path: Option<PathBuf>,
}

impl PendingApply {
    pub fn new(target_version: impl Into<String>, method: ApplyMethod, artifact: &ReadyArtifact) -> Self {
        let payload_path = if artifact.payload_path != artifact.archive_path {
            Some(artifact.payload_path.clone())
        } else {
            None
        };
        Self {
            target_version: target_version.into(),
            method,
            file_path: artifact.archive_path.clone(),
            file_sha256: artifact.sha256.clone(),
            started_at: Utc::now(),
            payload_path,
        }
    }
}

/// A verified download waiting to be installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyArtifact {
    /// The verified file as downloaded
    pub archive_path: PathBuf,
    /// What gets installed: the file itself, or the extracted bundle root
    pub payload_path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// Immutable view of the engine published with every state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStateSnapshot {
    pub state: UpdateState,
    pub current_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// 0 to 100
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_op: Option<ErrorOp>,
    pub policy: InstallPolicy,
}

/// Fractional percentage of `total`, clamped to 0..=100; 0 when the total is unknown
pub fn percent_of(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (downloaded as f64 * 100.0 / total as f64).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(source: ReleaseSource, sha256: &str) -> UpdateInfo {
        UpdateInfo {
            version: "v1.2.0".to_string(),
            pub_date: None,
            notes: String::new(),
            download_url: "https://example.com/a".to_string(),
            sha256: sha256.to_string(),
            size: 1,
            source,
        }
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&UpdateState::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
        let op: ErrorOp = serde_json::from_str("\"apply\"").unwrap();
        assert_eq!(op, ErrorOp::Apply);
    }

    #[test]
    fn test_busy_states() {
        assert!(UpdateState::Downloading.is_busy());
        assert!(UpdateState::Ready.is_busy());
        assert!(UpdateState::Applying.is_busy());
        assert!(!UpdateState::Available.is_busy());
        assert!(!UpdateState::Error.is_busy());
    }

    #[test]
    fn test_auto_download_requires_manifest_checksum() {
        assert!(info(ReleaseSource::Manifest, "abc").can_auto_download());
        assert!(!info(ReleaseSource::Manifest, "  ").can_auto_download());
        assert!(!info(ReleaseSource::ReleaseApi, "abc").can_auto_download());
    }

    #[test]
    fn test_pending_apply_records_payload_only_when_extracted() {
        let plain = ReadyArtifact {
            archive_path: PathBuf::from("/d/app.AppImage"),
            payload_path: PathBuf::from("/d/app.AppImage"),
            sha256: "aa".to_string(),
            size: 3,
        };
        assert_eq!(PendingApply::new("v2", ApplyMethod::Swap, &plain).payload_path, None);

        let bundle = ReadyArtifact {
            payload_path: PathBuf::from("/d/extracted/CodeSwitch.app"),
            ..plain
        };
        let pending = PendingApply::new("v2", ApplyMethod::Swap, &bundle);
        assert_eq!(
            pending.payload_path,
            Some(PathBuf::from("/d/extracted/CodeSwitch.app"))
        );
        assert_eq!(pending.file_sha256, "aa");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 0), 0.0);
        assert_eq!(percent_of(50, 200), 25.0);
        assert_eq!(percent_of(300, 200), 100.0);
        assert_eq!(percent_of(1, 8), 12.5);
    }
}
