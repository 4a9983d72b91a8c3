//! Service construction and polling helpers

use super::constants::*;
use super::hosts::{FakeInstaller, RecordingHost};
use codeswitch_core::types::PolicySetting;
use codeswitch_core::RuntimeConfig;
use codeswitch_update::{
    Platform, ServiceOptions, UpdateService, UpdateState, UpdateStateSnapshot, UpdateStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::MockServer;

/// Configuration pointing every release URL at `server`
pub fn test_config(server: &MockServer) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.release.manifest_url = format!("{}{}", server.uri(), MANIFEST_PATH);
    config.release.releases_api_url = format!("{}{}", server.uri(), RELEASE_API_PATH);
    config.release.allowed_url_prefixes = vec![format!("{}/", server.uri())];
    config.network.http_timeout_secs = 5;
    config.installer.policy = PolicySetting::Portable;
    config.download.buffer_size = 4096;
    config
}

/// A service wired to a mock server, with its doubles and scratch directory
pub struct TestService {
    pub service: UpdateService,
    pub host: Arc<RecordingHost>,
    pub installer: Arc<FakeInstaller>,
    pub temp: TempDir,
}

impl TestService {
    pub fn data_dir(&self) -> PathBuf {
        self.temp.path().join("update")
    }

    pub fn store(&self) -> UpdateStore {
        UpdateStore::new(self.data_dir())
    }

    pub fn exe_path(&self) -> PathBuf {
        self.temp.path().join("bin").join("CodeSwitch.AppImage")
    }
}

pub fn options_for(server: &MockServer, temp: &TempDir, current_version: &str) -> ServiceOptions {
    ServiceOptions::new(
        current_version,
        temp.path().join("update"),
        test_config(server),
        temp.path().join("bin").join("CodeSwitch.AppImage"),
    )
    .with_platform(Platform::new("linux", "x86_64"))
}

/// Start a service for `CURRENT_VERSION` against `server`
pub fn start_service(server: &MockServer) -> TestService {
    start_service_in(server, TempDir::new().unwrap(), FakeInstaller::default())
}

pub fn start_service_in(server: &MockServer, temp: TempDir, installer: FakeInstaller) -> TestService {
    let host = Arc::new(RecordingHost::default());
    let installer = Arc::new(installer);
    let options = options_for(server, &temp, CURRENT_VERSION).with_installer(installer.clone());
    let service = UpdateService::new(options, host.clone()).unwrap();
    TestService {
        service,
        host,
        installer,
        temp,
    }
}

/// Poll until the service reaches `expected`, panicking after 10 seconds
pub async fn wait_for_state(service: &UpdateService, expected: UpdateState) -> UpdateStateSnapshot {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = service.state();
        if snapshot.state == expected {
            return snapshot;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {}, last snapshot {:?}", expected, snapshot);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
