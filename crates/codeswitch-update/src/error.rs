//! Error types for codeswitch-update

use crate::state::{ApplyMethod, UpdateState};
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using codeswitch-update's error type
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Errors produced by the update engine
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Operation not permitted in the current state
    #[error("Cannot {operation} while {state} (allowed: {allowed})")]
    InvalidState {
        operation: &'static str,
        state: UpdateState,
        allowed: &'static str,
    },

    /// No update target is known
    #[error("No update available")]
    NoTarget,

    /// Release carries no checksum, so it cannot be installed automatically
    #[error("SHA256 checksum not available for {version}. Please download manually from the releases page")]
    ChecksumUnavailable { version: String },

    /// Download URL (or its redirect target) is outside the allow-list
    #[error("Download URL not allowed: {url}")]
    UrlNotAllowed { url: String },

    /// Cancel requested while no download is running
    #[error("No download in progress")]
    NotDownloading,

    /// Release source answered with an error status
    #[error("{source_name} returned HTTP {status}")]
    SourceStatus { source_name: &'static str, status: u16 },

    /// Manifest lists no build for this platform
    #[error("No release for platform: {0}")]
    PlatformNotFound(String),

    /// Release listing has no asset matching this platform
    #[error("No release asset found: {0}")]
    AssetNotFound(String),

    /// Download server answered with an unexpected status
    #[error("Unexpected download response: HTTP {0}")]
    UnexpectedStatus(u16),

    /// Downloaded bytes do not match the published digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Transfer ended early; the partial file is kept for resume
    #[error("Download incomplete: {downloaded} of {expected} bytes")]
    Incomplete { downloaded: u64, expected: u64 },

    /// Transfer produced more bytes than published; the partial file is discarded
    #[error("Download exceeded expected size: {downloaded} > {expected} bytes")]
    Oversized { downloaded: u64, expected: u64 },

    /// Archive could not be read or unpacked
    #[error("Archive error: {0}")]
    Archive(String),

    /// Archive entry would be written outside the extraction directory
    #[error("Unsafe path in archive: {0}")]
    UnsafeArchivePath(String),

    /// Apply method has no implementation on this OS
    #[error("{method} updates are not supported on {os}; please reinstall manually")]
    UnsupportedMethod { method: ApplyMethod, os: String },

    /// Installer helper could not be started
    #[error("Failed to launch update helper: {0}")]
    Launch(String),

    /// Executable path cannot locate an install directory
    #[error("Executable path {0:?} has no parent directory")]
    ExecutablePath(std::path::PathBuf),

    /// Public call made outside a tokio runtime
    #[error("Update service requires a tokio runtime")]
    NoRuntime,

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persistence or configuration error from codeswitch-core
    #[error(transparent)]
    Core(#[from] codeswitch_core::Error),

    /// Error shared between callers of a de-duplicated request
    #[error(transparent)]
    Shared(#[from] Arc<UpdateError>),
}

impl UpdateError {
    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: UpdateState, allowed: &'static str) -> Self {
        Self::InvalidState {
            operation,
            state,
            allowed,
        }
    }

    /// Create a checksum unavailable error
    pub fn checksum_unavailable(version: impl Into<String>) -> Self {
        Self::ChecksumUnavailable {
            version: version.into(),
        }
    }

    /// Create a URL not allowed error
    pub fn url_not_allowed(url: impl Into<String>) -> Self {
        Self::UrlNotAllowed { url: url.into() }
    }

    /// Create an archive error
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }
}
