//! Platform identification and install policy detection

use codeswitch_core::types::PolicySetting;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Operating system and CPU architecture, as reported by `std::env::consts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was built for
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    pub fn is_macos(&self) -> bool {
        self.os == "macos"
    }

    pub fn is_linux(&self) -> bool {
        self.os == "linux"
    }

    /// Key into the manifest's `platforms` map
    pub fn manifest_key(&self, policy: InstallPolicy) -> String {
        match (self.os.as_str(), self.arch.as_str()) {
            ("windows", "x86_64") if policy == InstallPolicy::Installer => {
                "windows-x86_64-installer".to_string()
            }
            ("windows", "x86_64") => "windows-x86_64".to_string(),
            ("macos", "aarch64") => "darwin-aarch64".to_string(),
            ("macos", "x86_64") => "darwin-x86_64".to_string(),
            ("linux", "x86_64") => "linux-x86_64".to_string(),
            (os, arch) => format!("{}-{}", os, arch),
        }
    }

    /// Published asset name for `version` on this platform, if one is built
    pub fn asset_name(&self, prefix: &str, version: &str, policy: InstallPolicy) -> Option<String> {
        let version = version.trim();
        let version = version.strip_prefix('v').unwrap_or(version);
        match (self.os.as_str(), self.arch.as_str()) {
            ("windows", _) if policy == InstallPolicy::Installer => {
                Some(format!("{}-v{}-amd64-installer.exe", prefix, version))
            }
            ("windows", _) => Some(format!("{}-v{}.exe", prefix, version)),
            ("macos", "aarch64") => Some(format!("{}-v{}-macos-arm64.zip", prefix, version)),
            ("macos", _) => Some(format!("{}-v{}-macos-amd64.zip", prefix, version)),
            ("linux", _) => Some(format!("{}-v{}.AppImage", prefix, version)),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// How this installation is deployed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallPolicy {
    /// Self-contained, writable install; the binary is swapped in place
    #[default]
    Portable,
    /// Managed install; the platform installer is run
    Installer,
}

impl fmt::Display for InstallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallPolicy::Portable => write!(f, "portable"),
            InstallPolicy::Installer => write!(f, "installer"),
        }
    }
}

/// Resolve the install policy. `Auto` probes the executable's directory once;
/// callers cache the result for the life of the process.
pub fn detect_policy(setting: PolicySetting, platform: &Platform, exe_path: &Path) -> InstallPolicy {
    match setting {
        PolicySetting::Portable => return InstallPolicy::Portable,
        PolicySetting::Installer => return InstallPolicy::Installer,
        PolicySetting::Auto => {}
    }

    let Some(exe_dir) = exe_path.parent() else {
        warn!("Executable path {:?} has no parent, assuming installer deployment", exe_path);
        return InstallPolicy::Installer;
    };

    if platform.is_windows() && is_under_program_files(exe_dir) && !can_write_to_dir(exe_dir) {
        debug!("Executable under Program Files and not writable: installer policy");
        return InstallPolicy::Installer;
    }

    if can_write_to_dir(exe_dir) {
        debug!("Executable directory {:?} is writable: portable policy", exe_dir);
        InstallPolicy::Portable
    } else {
        debug!("Executable directory {:?} is not writable: installer policy", exe_dir);
        InstallPolicy::Installer
    }
}

fn is_under_program_files(dir: &Path) -> bool {
    let dir = dir.to_string_lossy().to_lowercase();
    ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .filter(|root| !root.is_empty())
        .any(|root| dir.starts_with(&root.to_lowercase()))
}

/// Probe writability by creating and renaming a scratch file, which catches
/// directories that allow creation but not replacement.
pub fn can_write_to_dir(dir: &Path) -> bool {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let probe = dir.join(format!(".write-test-{}", nanos));
    let renamed = dir.join(format!(".write-test-{}.renamed", nanos));

    if fs::write(&probe, b"probe").is_err() {
        return false;
    }
    let ok = fs::rename(&probe, &renamed).is_ok();
    let _ = fs::remove_file(&probe);
    let _ = fs::remove_file(&renamed);
    ok
}
