//! Release discovery
//!
//! The primary source is a static `latest.json` manifest published with every
//! release. When it is unreachable or lacks this platform, the release listing
//! API is used instead; that source never publishes checksums.

use crate::error::{Result, UpdateError};
use crate::platform::{InstallPolicy, Platform};
use crate::singleflight::SingleFlight;
use crate::state::{ReleaseSource, UpdateInfo};
use chrono::{DateTime, Utc};
use codeswitch_core::RuntimeConfig;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key under which concurrent checks are collapsed
const CHECK_KEY: &str = "check";

const RELEASE_API_ACCEPT: &str = "application/vnd.github.v3+json";

/// Result of a check, shareable between de-duplicated callers
pub type CheckResult = std::result::Result<UpdateInfo, Arc<UpdateError>>;

/// Static release manifest (`latest.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub version: String,
    #[serde(default)]
    pub pub_date: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub platforms: HashMap<String, ManifestAsset>,
}

/// Per-platform entry of the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestAsset {
    pub url: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
}

impl ReleaseManifest {
    /// Select this platform's build
    pub fn resolve(&self, platform_key: &str) -> Result<UpdateInfo> {
        let asset = self
            .platforms
            .get(platform_key)
            .ok_or_else(|| UpdateError::PlatformNotFound(platform_key.to_string()))?;

        Ok(UpdateInfo {
            version: self.version.clone(),
            pub_date: parse_date(self.pub_date.as_deref()),
            notes: self.notes.clone(),
            download_url: asset.url.clone(),
            sha256: asset.sha256.trim().to_lowercase(),
            size: asset.size,
            source: ReleaseSource::Manifest,
        })
    }
}

/// Release listing API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// Asset of a listed release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    /// Select the asset named after this platform's build
    pub fn resolve(&self, asset_name: &str) -> Result<UpdateInfo> {
        let asset = self
            .assets
            .iter()
            .find(|a| a.name == asset_name)
            .ok_or_else(|| UpdateError::AssetNotFound(asset_name.to_string()))?;

        Ok(UpdateInfo {
            version: self.tag_name.clone(),
            pub_date: parse_date(self.published_at.as_deref()),
            notes: self.body.clone().unwrap_or_default(),
            download_url: asset.browser_download_url.clone(),
            sha256: String::new(),
            size: asset.size,
            source: ReleaseSource::ReleaseApi,
        })
    }
}

fn parse_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    match DateTime::parse_from_rfc3339(raw) {
        Ok(date) => Some(date.with_timezone(&Utc)),
        Err(e) => {
            debug!("Ignoring unparseable release date {:?}: {}", raw, e);
            None
        }
    }
}

/// Looks up the latest published release for this platform
#[derive(Clone)]
pub struct VersionChecker {
    inner: Arc<CheckerInner>,
}

struct CheckerInner {
    client: Client,
    manifest_url: String,
    releases_api_url: String,
    asset_prefix: String,
    timeout: Duration,
    platform: Platform,
    policy: InstallPolicy,
    flight: SingleFlight<CheckResult>,
}

impl VersionChecker {
    pub fn new(client: Client, config: &RuntimeConfig, platform: Platform, policy: InstallPolicy) -> Self {
        Self {
            inner: Arc::new(CheckerInner {
                client,
                manifest_url: config.release.manifest_url.clone(),
                releases_api_url: config.release.releases_api_url.clone(),
                asset_prefix: config.release.asset_prefix.clone(),
                timeout: Duration::from_secs(config.network.http_timeout_secs),
                platform,
                policy,
                flight: SingleFlight::new(),
            }),
        }
    }

    /// Fetch the latest release. Concurrent callers share one request.
    pub async fn fetch_latest(&self) -> CheckResult {
        let inner = Arc::clone(&self.inner);
        self.inner
            .flight
            .run(CHECK_KEY, move || async move {
                inner.resolve().await.map_err(Arc::new)
            })
            .await
    }
}

impl CheckerInner {
    async fn resolve(&self) -> Result<UpdateInfo> {
        match self.fetch_manifest().await {
            Ok(info) => {
                info!("Latest release {} (manifest)", info.version);
                Ok(info)
            }
            Err(manifest_err) => {
                warn!(
                    "Release manifest unavailable ({}), falling back to release API",
                    manifest_err
                );
                let info = self.fetch_release_api().await?;
                info!("Latest release {} (release API, no checksum)", info.version);
                Ok(info)
            }
        }
    }

    async fn fetch_manifest(&self) -> Result<UpdateInfo> {
        debug!("Fetching release manifest from {}", self.manifest_url);
        let response = self
            .client
            .get(&self.manifest_url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpdateError::SourceStatus {
                source_name: "release manifest",
                status: response.status().as_u16(),
            });
        }

        let manifest: ReleaseManifest = response.json().await?;
        manifest.resolve(&self.platform.manifest_key(self.policy))
    }

    async fn fetch_release_api(&self) -> Result<UpdateInfo> {
        debug!("Fetching latest release from {}", self.releases_api_url);
        let response = self
            .client
            .get(&self.releases_api_url)
            .header(ACCEPT, RELEASE_API_ACCEPT)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpdateError::SourceStatus {
                source_name: "release API",
                status: response.status().as_u16(),
            });
        }

        let release: Release = response.json().await?;
        let asset_name = self
            .platform
            .asset_name(&self.asset_prefix, &release.tag_name, self.policy)
            .ok_or_else(|| UpdateError::AssetNotFound(format!("platform {}", self.platform)))?;
        release.resolve(&asset_name)
    }
}
