//! Applying a verified update
//!
//! The engine never overwrites the running binary itself. It hands a plan to
//! an [`Installer`], which starts a detached helper and returns; the host then
//! exits so the helper can swap files and relaunch.

mod reconcile;
mod scripts;

pub use reconcile::{reconcile_pending_apply, ReconcileOutcome};
pub use scripts::{ps_quote, render_posix_swap, render_windows_installer, render_windows_swap, sh_quote};

use crate::error::{Result, UpdateError};
use crate::platform::Platform;
use crate::state::ApplyMethod;
use crate::store::UpdateStore;
use codeswitch_core::atomic_write;
use codeswitch_core::types::InstallerConfig;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

/// Helper timing knobs, taken from [`InstallerConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperTiming {
    pub parent_exit_timeout_secs: u64,
    pub swap_retries: u32,
    pub swap_retry_delay_ms: u64,
    pub cleanup_delay_secs: u64,
}

impl Default for HelperTiming {
    fn default() -> Self {
        Self::from(&InstallerConfig::default())
    }
}

impl From<&InstallerConfig> for HelperTiming {
    fn from(config: &InstallerConfig) -> Self {
        Self {
            parent_exit_timeout_secs: config.parent_exit_timeout_secs,
            swap_retries: config.swap_retries,
            swap_retry_delay_ms: config.swap_retry_delay_ms,
            cleanup_delay_secs: config.cleanup_delay_secs,
        }
    }
}

/// Everything a helper needs to install one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPlan {
    /// Process the helper waits for
    pub pid: u32,
    pub method: ApplyMethod,
    /// Installed executable or `.app` bundle to replace
    pub target: PathBuf,
    /// Verified file or bundle to install
    pub payload: PathBuf,
    pub timing: HelperTiming,
}

/// Starts the out-of-process update helper
pub trait Installer: Send + Sync {
    /// Launch the helper detached from this process. Must return promptly.
    fn launch(&self, plan: &ApplyPlan) -> Result<()>;
}

/// Helper script dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    Windows,
    MacOs,
    Linux,
}

impl ScriptFlavor {
    pub fn for_platform(platform: &Platform) -> Self {
        if platform.is_windows() {
            ScriptFlavor::Windows
        } else if platform.is_macos() {
            ScriptFlavor::MacOs
        } else {
            ScriptFlavor::Linux
        }
    }

    pub fn script_name(&self) -> &'static str {
        match self {
            ScriptFlavor::Windows => "update.ps1",
            ScriptFlavor::MacOs | ScriptFlavor::Linux => "update.sh",
        }
    }

    fn os_name(&self) -> &'static str {
        match self {
            ScriptFlavor::Windows => "windows",
            ScriptFlavor::MacOs => "macos",
            ScriptFlavor::Linux => "linux",
        }
    }
}

/// Installer that writes a helper script into the data directory and runs it
#[derive(Debug, Clone)]
pub struct ScriptInstaller {
    flavor: ScriptFlavor,
    store: UpdateStore,
}

impl ScriptInstaller {
    pub fn new(flavor: ScriptFlavor, store: UpdateStore) -> Self {
        Self { flavor, store }
    }

    pub fn for_platform(platform: &Platform, store: UpdateStore) -> Self {
        Self::new(ScriptFlavor::for_platform(platform), store)
    }

    /// Script text for `plan`
    pub fn render(&self, plan: &ApplyPlan) -> Result<String> {
        match (self.flavor, plan.method) {
            (ScriptFlavor::Windows, ApplyMethod::Swap) => Ok(render_windows_swap(plan)),
            (ScriptFlavor::Windows, ApplyMethod::Installer) => Ok(render_windows_installer(plan)),
            (ScriptFlavor::MacOs, ApplyMethod::Swap) => Ok(render_posix_swap(plan, true)),
            (ScriptFlavor::Linux, ApplyMethod::Swap) => Ok(render_posix_swap(plan, false)),
            (flavor, method) => Err(UpdateError::UnsupportedMethod {
                method,
                os: flavor.os_name().to_string(),
            }),
        }
    }

    /// Write the helper script and return its path
    pub fn write_script(&self, plan: &ApplyPlan) -> Result<PathBuf> {
        let script = self.render(plan)?;
        let path = self.store.script_path(self.flavor.script_name());
        atomic_write(&path, script.as_bytes(), 0o755)?;
        Ok(path)
    }
}

impl Installer for ScriptInstaller {
    fn launch(&self, plan: &ApplyPlan) -> Result<()> {
        let script = self.write_script(plan)?;
        info!(
            "Launching {} update helper {:?} for {:?}",
            plan.method, script, plan.target
        );
        spawn_detached(self.flavor, &script).map_err(|e| UpdateError::Launch(e.to_string()))
    }
}

fn spawn_detached(flavor: ScriptFlavor, script: &Path) -> std::io::Result<()> {
    let mut command = match flavor {
        ScriptFlavor::Windows => {
            let mut c = Command::new("powershell.exe");
            c.args([
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-WindowStyle",
                "Hidden",
                "-File",
            ]);
            c.arg(script);
            c
        }
        ScriptFlavor::MacOs | ScriptFlavor::Linux => {
            let mut c = Command::new("/bin/bash");
            c.arg(script);
            c
        }
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    detach(&mut command);

    command.spawn().map(|_| ())
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

/// What the helper replaces: the executable, or on macOS its `.app` bundle
pub fn install_target(exe_path: &Path, platform: &Platform) -> PathBuf {
    if platform.is_macos() {
        if let Some(bundle) = exe_path
            .ancestors()
            .find(|p| p.extension().is_some_and(|ext| ext == "app"))
        {
            return bundle.to_path_buf();
        }
    }
    exe_path.to_path_buf()
}
