//! The update state machine
//!
//! [`UpdateService`] owns the whole update lifecycle:
//!
//! ```text
//! idle ──► checking ──► available ──► downloading ──► ready ──► applying ──► (exit)
//!   ▲          │            ▲  │            │  │                  │
//!   │          ▼            │  │            │  └─► available      ▼
//!   └────── idle/error ◄────┘  └─► idle     └────► error ◄──── error(apply)
//! ```
//!
//! All mutable state sits behind one mutex that is never held across an
//! await, I/O or event emission. Long work (checks, transfers) runs on the
//! tokio runtime; the public calls validate synchronously and return.

use crate::download::{DownloadManager, DownloadOutcome, UrlAllowList};
use crate::error::{Result, UpdateError};
use crate::events::UpdateHost;
use crate::installer::{
    install_target, reconcile_pending_apply, ApplyPlan, HelperTiming, Installer,
    ReconcileOutcome, ScriptInstaller,
};
use crate::platform::{detect_policy, InstallPolicy, Platform};
use crate::progress::ProgressEmitter;
use crate::releases::VersionChecker;
use crate::state::{
    percent_of, ApplyMethod, ErrorOp, PendingApply, ReadyArtifact, UpdateInfo, UpdateState,
    UpdateStateSnapshot,
};
use crate::store::UpdateStore;
use crate::version::should_surface;
use codeswitch_core::types::NetworkConfig;
use codeswitch_core::{get_update_data_dir, HierarchicalConfigLoader, RuntimeConfig};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Construction parameters for [`UpdateService`]
#[derive(Clone)]
pub struct ServiceOptions {
    /// Version of the running application, e.g. `v1.1.11`
    pub current_version: String,
    /// Working directory (`~/.code-switch/update`)
    pub data_dir: PathBuf,
    pub config: RuntimeConfig,
    pub platform: Platform,
    /// Path of the running executable
    pub exe_path: PathBuf,
    /// Defaults to a [`ScriptInstaller`] for `platform`
    pub installer: Option<Arc<dyn Installer>>,
}

impl ServiceOptions {
    pub fn new(
        current_version: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        config: RuntimeConfig,
        exe_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            current_version: current_version.into(),
            data_dir: data_dir.into(),
            config,
            platform: Platform::current(),
            exe_path: exe_path.into(),
            installer: None,
        }
    }

    /// Options from the user's environment: hierarchical config, the
    /// standard data directory and the running executable.
    pub fn from_environment(current_version: impl Into<String>) -> Result<Self> {
        let config = HierarchicalConfigLoader::new()?.load_runtime_config()?;
        let data_dir = get_update_data_dir()?;
        let exe_path = std::env::current_exe()?;
        Ok(Self::new(current_version, data_dir, config, exe_path))
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = Some(installer);
        self
    }
}

/// Mutable lifecycle state
#[derive(Default)]
struct Machine {
    state: UpdateState,
    target: Option<UpdateInfo>,
    artifact: Option<ReadyArtifact>,
    downloaded: u64,
    total: u64,
    last_error: Option<String>,
    error_op: Option<ErrorOp>,
    dismissed_version: Option<String>,
    cancel: Option<CancellationToken>,
    /// Bumped per transfer; results of older transfers are ignored
    generation: u64,
}

impl Machine {
    fn clear_error(&mut self) {
        self.last_error = None;
        self.error_op = None;
    }

    fn fail(&mut self, op: ErrorOp, err: &UpdateError) {
        self.state = UpdateState::Error;
        self.error_op = Some(op);
        self.last_error = Some(err.to_string());
    }
}

struct DownloadJob {
    info: UpdateInfo,
    cancel: CancellationToken,
    generation: u64,
}

struct ServiceInner {
    current_version: String,
    platform: Platform,
    policy: InstallPolicy,
    exe_path: PathBuf,
    timing: HelperTiming,
    store: UpdateStore,
    checker: VersionChecker,
    downloader: DownloadManager,
    installer: Arc<dyn Installer>,
    emitter: ProgressEmitter,
    host: Arc<dyn UpdateHost>,
    runtime: Handle,
    startup: ReconcileOutcome,
    /// Serializes transfers so a cancelled one has saved its checkpoint
    /// before the next one reads it
    transfer_lock: tokio::sync::Mutex<()>,
    machine: Mutex<Machine>,
}

impl ServiceInner {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, m: &Machine) -> UpdateStateSnapshot {
        let target = m.target.as_ref();
        UpdateStateSnapshot {
            state: m.state,
            current_version: self.current_version.clone(),
            latest_version: target.map(|t| t.version.clone()),
            notes: target.map(|t| t.notes.clone()).filter(|n| !n.is_empty()),
            download_url: target
                .map(|t| t.download_url.clone())
                .filter(|u| !u.is_empty()),
            downloaded_bytes: m.downloaded,
            total_bytes: m.total,
            progress: percent_of(m.downloaded, m.total),
            error: m.last_error.clone(),
            error_op: m.error_op,
            policy: self.policy,
        }
    }
}

/// Self-update engine. Cheap to clone; all clones share one state machine.
#[derive(Clone)]
pub struct UpdateService {
    inner: Arc<ServiceInner>,
}

impl UpdateService {
    /// Build the service and reconcile any marker left by a previous
    /// restart-and-apply cycle. Must be called inside a tokio runtime.
    pub fn new(options: ServiceOptions, host: Arc<dyn UpdateHost>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| UpdateError::NoRuntime)?;
        let ServiceOptions {
            current_version,
            data_dir,
            config,
            platform,
            exe_path,
            installer,
        } = options;
        if exe_path.parent().is_none_or(|dir| dir.as_os_str().is_empty()) {
            return Err(UpdateError::ExecutablePath(exe_path));
        }

        let client = build_client(&config.network)?;
        let policy = detect_policy(config.installer.policy, &platform, &exe_path);
        info!(
            "Update engine for {} on {} ({} install)",
            current_version, platform, policy
        );

        let store = UpdateStore::new(data_dir);
        let checker = VersionChecker::new(client.clone(), &config, platform.clone(), policy);
        let downloader = DownloadManager::new(
            client,
            store.clone(),
            UrlAllowList::new(config.release.allowed_url_prefixes.clone()),
            config.download.buffer_size,
        );
        let installer = installer
            .unwrap_or_else(|| Arc::new(ScriptInstaller::for_platform(&platform, store.clone())));
        let emitter = ProgressEmitter::new(
            Arc::clone(&host),
            Duration::from_millis(config.progress.throttle_ms),
            config.progress.min_percent_delta,
        );

        let mut machine = Machine {
            dismissed_version: store.load_dismissed_version(),
            ..Machine::default()
        };

        let startup =
            reconcile_pending_apply(&store, &current_version, config.download.buffer_size);
        match &startup {
            ReconcileOutcome::Restored { info, artifact } => {
                machine.state = UpdateState::Ready;
                machine.downloaded = artifact.size;
                machine.total = artifact.size;
                machine.target = Some(info.clone());
                machine.artifact = Some(artifact.clone());
            }
            ReconcileOutcome::Applied { version } => info!("Running updated version {}", version),
            ReconcileOutcome::Discarded { version } => {
                warn!("Discarded unfinished update to {}", version)
            }
            ReconcileOutcome::NoMarker => {}
        }

        Ok(Self {
            inner: Arc::new(ServiceInner {
                current_version,
                platform,
                policy,
                exe_path,
                timing: HelperTiming::from(&config.installer),
                store,
                checker,
                downloader,
                installer,
                emitter,
                host,
                runtime,
                startup,
                transfer_lock: tokio::sync::Mutex::new(()),
                machine: Mutex::new(machine),
            }),
        })
    }

    /// Check for a newer release.
    ///
    /// While downloading, ready or applying this returns the current target
    /// without changing state. Concurrent checks share one request.
    pub async fn check_update(&self) -> Result<Option<UpdateInfo>> {
        let snapshot = {
            let mut m = self.inner.lock();
            if m.state.is_busy() {
                debug!("Skipping check while {}", m.state);
                return Ok(m.target.clone());
            }
            m.state = UpdateState::Checking;
            m.clear_error();
            self.inner.snapshot(&m)
        };
        self.inner.emitter.emit_state(snapshot);

        let result = self.inner.checker.fetch_latest().await;

        let (outcome, snapshot) = {
            let mut m = self.inner.lock();
            if m.state.is_busy() {
                // Another caller already moved on with a shared result
                return Ok(m.target.clone());
            }

            let outcome = match result {
                Ok(info)
                    if should_surface(
                        &info.version,
                        &self.inner.current_version,
                        m.dismissed_version.as_deref(),
                    ) =>
                {
                    info!("Update available: {} -> {}", self.inner.current_version, info.version);
                    m.state = UpdateState::Available;
                    m.downloaded = 0;
                    m.total = info.size;
                    m.artifact = None;
                    m.target = Some(info.clone());
                    Ok(Some(info))
                }
                Ok(info) => {
                    debug!("Latest release {} is not offered", info.version);
                    m.state = UpdateState::Idle;
                    m.downloaded = 0;
                    m.total = 0;
                    m.target = None;
                    Ok(None)
                }
                Err(e) => {
                    warn!("Update check failed: {}", e);
                    let err = UpdateError::Shared(e);
                    m.fail(ErrorOp::Check, &err);
                    Err(err)
                }
            };
            (outcome, self.inner.snapshot(&m))
        };
        self.inner.emitter.emit_state(snapshot);
        outcome
    }

    /// Start downloading the available update in the background.
    ///
    /// A no-op while downloading or ready. Allowed from `available`, or from
    /// `error` after a failed download (retry, resuming where possible).
    pub fn download_update(&self) -> Result<()> {
        let (job, snapshot) = {
            let mut m = self.inner.lock();
            match m.state {
                UpdateState::Downloading | UpdateState::Ready => {
                    debug!("Download already {}", m.state);
                    return Ok(());
                }
                UpdateState::Available => {}
                UpdateState::Error
                    if m.error_op == Some(ErrorOp::Download) && m.target.is_some() => {}
                state => {
                    return Err(UpdateError::invalid_state(
                        "download",
                        state,
                        "available, error after download",
                    ))
                }
            }

            let info = m.target.clone().ok_or(UpdateError::NoTarget)?;
            if !info.can_auto_download() {
                let err = UpdateError::checksum_unavailable(&info.version);
                m.fail(ErrorOp::Download, &err);
                let snapshot = self.inner.snapshot(&m);
                drop(m);
                self.inner.emitter.emit_state(snapshot);
                return Err(err);
            }
            self.inner
                .downloader
                .allow_list()
                .check(&info.download_url)?;

            let cancel = CancellationToken::new();
            m.generation += 1;
            m.cancel = Some(cancel.clone());
            m.state = UpdateState::Downloading;
            m.clear_error();
            m.total = info.size;

            let job = DownloadJob {
                info,
                cancel,
                generation: m.generation,
            };
            (job, self.inner.snapshot(&m))
        };
        self.inner.emitter.emit_state(snapshot);

        let service = self.clone();
        self.inner
            .runtime
            .spawn(async move { service.run_download(job).await });
        Ok(())
    }

    async fn run_download(&self, job: DownloadJob) {
        let _transfer = self.inner.transfer_lock.lock().await;
        if job.cancel.is_cancelled() {
            debug!("Download cancelled before it started");
            return;
        }

        let reporter = self.clone();
        let generation = job.generation;
        let result = self
            .inner
            .downloader
            .download(&job.info, &job.cancel, move |downloaded, total| {
                reporter.record_progress(generation, downloaded, total)
            })
            .await;

        let snapshot = {
            let mut m = self.inner.lock();
            if m.generation != generation || m.state != UpdateState::Downloading {
                debug!("Ignoring result of a superseded download");
                return;
            }
            m.cancel = None;

            match result {
                Ok(DownloadOutcome::Completed(artifact)) => {
                    info!("Update {} downloaded and verified", job.info.version);
                    m.downloaded = artifact.size;
                    m.total = artifact.size;
                    m.artifact = Some(artifact);
                    m.state = UpdateState::Ready;
                }
                Ok(DownloadOutcome::Cancelled { downloaded }) => {
                    m.downloaded = downloaded;
                    m.state = UpdateState::Available;
                }
                Err(e) => {
                    error!("Download of {} failed: {}", job.info.version, e);
                    m.fail(ErrorOp::Download, &e);
                }
            }
            self.inner.snapshot(&m)
        };
        self.inner.emitter.emit_state(snapshot);
    }

    fn record_progress(&self, generation: u64, downloaded: u64, total: u64) {
        let state = {
            let mut m = self.inner.lock();
            if m.generation != generation || m.state != UpdateState::Downloading {
                return;
            }
            m.downloaded = downloaded;
            m.total = total;
            m.state
        };
        self.inner.emitter.emit_progress(state, downloaded, total);
    }

    /// Wait until no transfer task is running. After [`Self::cancel_download`]
    /// this returns once the checkpoint is on disk.
    pub async fn wait_for_transfer(&self) {
        let _transfer = self.inner.transfer_lock.lock().await;
    }

    /// Stop the running download, keeping its checkpoint for resume
    pub fn cancel_download(&self) -> Result<()> {
        let snapshot = {
            let mut m = self.inner.lock();
            if m.state != UpdateState::Downloading {
                return Err(UpdateError::NotDownloading);
            }
            if let Some(cancel) = m.cancel.take() {
                cancel.cancel();
            }
            m.state = UpdateState::Available;
            self.inner.snapshot(&m)
        };
        info!("Download cancelled");
        self.inner.emitter.emit_state(snapshot);
        Ok(())
    }

    /// Hand the verified update to the installer helper and ask the host to
    /// quit. Only valid when ready.
    pub fn request_restart(&self) -> Result<()> {
        let (info, artifact, snapshot) = {
            let mut m = self.inner.lock();
            if m.state != UpdateState::Ready {
                return Err(UpdateError::invalid_state("restart", m.state, "ready"));
            }
            let (Some(info), Some(artifact)) = (m.target.clone(), m.artifact.clone()) else {
                return Err(UpdateError::NoTarget);
            };
            m.state = UpdateState::Applying;
            (info, artifact, self.inner.snapshot(&m))
        };
        self.inner.emitter.emit_state(snapshot);

        match self.launch_helper(&info, &artifact) {
            Ok(()) => {
                info!("Update helper started, exiting to apply {}", info.version);
                self.inner.host.quit();
                Ok(())
            }
            Err(e) => {
                error!("Failed to apply update {}: {}", info.version, e);
                self.inner.store.clear_pending_apply();
                let snapshot = {
                    let mut m = self.inner.lock();
                    m.fail(ErrorOp::Apply, &e);
                    self.inner.snapshot(&m)
                };
                self.inner.emitter.emit_state(snapshot);
                Err(e)
            }
        }
    }

    fn launch_helper(&self, info: &UpdateInfo, artifact: &ReadyArtifact) -> Result<()> {
        let method = ApplyMethod::from(self.inner.policy);
        let pending = PendingApply::new(&info.version, method, artifact);
        self.inner.store.save_pending_apply(&pending)?;

        let plan = ApplyPlan {
            pid: std::process::id(),
            method,
            target: install_target(&self.inner.exe_path, &self.inner.platform),
            payload: artifact.payload_path.clone(),
            timing: self.inner.timing,
        };
        self.inner.installer.launch(&plan)
    }

    /// Never offer `version` again. Rejected while downloading, ready or applying.
    pub fn dismiss_update(&self, version: &str) -> Result<()> {
        let version = version.trim().to_string();
        let snapshot = {
            let mut m = self.inner.lock();
            if m.state.is_busy() {
                return Err(UpdateError::invalid_state(
                    "dismiss",
                    m.state,
                    "idle, checking, available, error",
                ));
            }
            m.dismissed_version = Some(version.clone());
            m.target = None;
            m.artifact = None;
            m.downloaded = 0;
            m.total = 0;
            m.state = UpdateState::Idle;
            m.clear_error();
            self.inner.snapshot(&m)
        };

        if let Err(e) = self.inner.store.save_dismissed_version(&version) {
            warn!("Failed to persist dismissed version {}: {}", version, e);
        }
        info!("Dismissed update {}", version);
        self.inner.emitter.emit_state(snapshot);
        Ok(())
    }

    /// Current state snapshot
    pub fn state(&self) -> UpdateStateSnapshot {
        let m = self.inner.lock();
        self.inner.snapshot(&m)
    }

    pub fn dismissed_version(&self) -> Option<String> {
        self.inner.lock().dismissed_version.clone()
    }

    pub fn current_version(&self) -> &str {
        &self.inner.current_version
    }

    pub fn policy(&self) -> InstallPolicy {
        self.inner.policy
    }

    /// What startup reconciliation found
    pub fn startup_reconciliation(&self) -> &ReconcileOutcome {
        &self.inner.startup
    }
}

fn build_client(network: &NetworkConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(network.user_agent.clone())
        .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
        .build()?;
    Ok(client)
}
