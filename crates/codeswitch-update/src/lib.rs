//! Self-update engine for CodeSwitch
//!
//! Provides:
//! - Release discovery from a static manifest with a release-listing fallback
//! - Resumable, cancellable downloads with SHA256 verification
//! - A state machine that emits throttled state and progress events to its host
//! - Out-of-process binary replacement through helper scripts
//! - Startup reconciliation of interrupted restart-and-apply cycles

pub mod commands;
pub mod download;
pub mod error;
pub mod events;
pub mod extract;
pub mod installer;
pub mod platform;
pub mod progress;
pub mod releases;
pub mod service;
pub mod singleflight;
pub mod state;
pub mod store;
pub mod verify;
pub mod version;

pub use commands::{CommandReply, UpdateCommand};
pub use download::{DownloadManager, DownloadOutcome, UrlAllowList};
pub use error::{Result, UpdateError};
pub use events::{NoopHost, ProgressEvent, UpdateEvent, UpdateHost, PROGRESS_EVENT, STATE_EVENT};
pub use installer::{ApplyPlan, Installer, ReconcileOutcome, ScriptFlavor, ScriptInstaller};
pub use platform::{InstallPolicy, Platform};
pub use releases::VersionChecker;
pub use service::{ServiceOptions, UpdateService};
pub use state::{
    ApplyMethod, ErrorOp, ReadyArtifact, ReleaseSource, UpdateInfo, UpdateState,
    UpdateStateSnapshot,
};
pub use store::UpdateStore;

/// Current application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
