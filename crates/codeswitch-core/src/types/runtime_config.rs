//! Runtime configuration types for the self-update engine
//!
//! These types control release discovery, network timeouts, progress
//! throttling and how the installer helper behaves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Network and HTTP configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Where releases are published
    #[serde(default)]
    pub release: ReleaseConfig,

    /// Download behaviour
    #[serde(default)]
    pub download: DownloadConfig,

    /// Progress event throttling
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Installer helper settings
    #[serde(default)]
    pub installer: InstallerConfig,
}

/// Network and HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// Timeout for manifest and release API requests, in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// TCP connect timeout, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// User agent string for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_user_agent() -> String {
    format!(
        "codeswitch/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Release discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReleaseConfig {
    /// Static release manifest (primary source)
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Release listing API (fallback source)
    #[serde(default = "default_releases_api_url")]
    pub releases_api_url: String,

    /// Prefix of published asset names, e.g. `CodeSwitch-v1.2.0.AppImage`
    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,

    /// Download URLs (including redirect targets) must start with one of these
    #[serde(default = "default_allowed_url_prefixes")]
    pub allowed_url_prefixes: Vec<String>,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            releases_api_url: default_releases_api_url(),
            asset_prefix: default_asset_prefix(),
            allowed_url_prefixes: default_allowed_url_prefixes(),
        }
    }
}

fn default_manifest_url() -> String {
    "https://github.com/Rogers-F/code-switch-R/releases/latest/download/latest.json".to_string()
}
fn default_releases_api_url() -> String {
    "https://api.github.com/repos/Rogers-F/code-switch-R/releases/latest".to_string()
}
fn default_asset_prefix() -> String {
    "CodeSwitch".to_string()
}
fn default_allowed_url_prefixes() -> Vec<String> {
    vec![
        "https://github.com/Rogers-F/code-switch-R/releases/download/".to_string(),
        "https://github.com/Rogers-F/code-switch-R/releases/latest/download/".to_string(),
        "https://objects.githubusercontent.com/".to_string(),
    ]
}

/// Download behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownloadConfig {
    /// Buffer size used when hashing and copying artifacts, in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_buffer_size() -> usize {
    32 * 1024
}

/// Progress event throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProgressConfig {
    /// Minimum interval between progress events, in milliseconds
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Minimum change in whole percent between progress events
    #[serde(default = "default_min_percent_delta")]
    pub min_percent_delta: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            min_percent_delta: default_min_percent_delta(),
        }
    }
}

fn default_throttle_ms() -> u64 {
    100
}
fn default_min_percent_delta() -> u8 {
    1
}

/// How an update is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySetting {
    /// Probe the install location once at startup
    #[default]
    Auto,
    /// Always swap the binary in place
    Portable,
    /// Always run the platform installer
    Installer,
}

impl FromStr for PolicySetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "portable" => Ok(Self::Portable),
            "installer" => Ok(Self::Installer),
            other => Err(format!(
                "unknown update policy '{}' (expected auto, portable or installer)",
                other
            )),
        }
    }
}

impl fmt::Display for PolicySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Portable => write!(f, "portable"),
            Self::Installer => write!(f, "installer"),
        }
    }
}

/// Installer helper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallerConfig {
    /// Deployment policy
    #[serde(default)]
    pub policy: PolicySetting,

    /// How long the helper waits for the application to exit, in seconds
    #[serde(default = "default_parent_exit_timeout")]
    pub parent_exit_timeout_secs: u64,

    /// Rename-swap attempts before rolling back
    #[serde(default = "default_swap_retries")]
    pub swap_retries: u32,

    /// Delay between swap attempts, in milliseconds
    #[serde(default = "default_swap_retry_delay")]
    pub swap_retry_delay_ms: u64,

    /// Delay before the helper removes the backup and payload, in seconds
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            policy: PolicySetting::default(),
            parent_exit_timeout_secs: default_parent_exit_timeout(),
            swap_retries: default_swap_retries(),
            swap_retry_delay_ms: default_swap_retry_delay(),
            cleanup_delay_secs: default_cleanup_delay(),
        }
    }
}

fn default_parent_exit_timeout() -> u64 {
    60
}
fn default_swap_retries() -> u32 {
    20
}
fn default_swap_retry_delay() -> u64 {
    100
}
fn default_cleanup_delay() -> u64 {
    2
}
