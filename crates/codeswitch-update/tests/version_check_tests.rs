//! Release discovery tests
//!
//! Tests cover:
//! - Manifest resolution for the running platform
//! - Fallback to the release listing API (no checksum)
//! - De-duplication of concurrent checks
//! - Dismissed versions and version gating through the service

mod common;

use codeswitch_core::RuntimeConfig;
use codeswitch_update::{
    InstallPolicy, Platform, ReleaseSource, UpdateError, UpdateService, UpdateState,
    VersionChecker,
};
use common::*;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn checker(config: &RuntimeConfig) -> VersionChecker {
    VersionChecker::new(
        Client::new(),
        config,
        Platform::new("linux", "x86_64"),
        InstallPolicy::Portable,
    )
}

#[tokio::test]
async fn test_manifest_is_primary_source() {
    let server = MockServer::start().await;
    let url = artifact_url(&server);
    mock_manifest(&server, manifest_json(LATEST_VERSION, &url, "ABCDEF0123", 2048)).await;

    let info = checker(&test_config(&server)).fetch_latest().await.unwrap();

    assert_eq!(info.version, LATEST_VERSION);
    assert_eq!(info.download_url, url);
    assert_eq!(info.sha256, "abcdef0123");
    assert_eq!(info.size, 2048);
    assert_eq!(info.source, ReleaseSource::Manifest);
    assert!(info.pub_date.is_some());
    assert!(info.can_auto_download());
}

#[tokio::test]
async fn test_falls_back_to_release_api_without_checksum() {
    let server = MockServer::start().await;
    let url = artifact_url(&server);
    mock_manifest_status(&server, 404).await;
    mock_release_api(&server, release_json(LATEST_VERSION, &url, 4096)).await;

    let info = checker(&test_config(&server)).fetch_latest().await.unwrap();

    assert_eq!(info.version, LATEST_VERSION);
    assert_eq!(info.download_url, url);
    assert_eq!(info.source, ReleaseSource::ReleaseApi);
    assert!(info.sha256.is_empty());
    assert!(!info.can_auto_download());
}

#[tokio::test]
async fn test_manifest_without_platform_falls_back() {
    let server = MockServer::start().await;
    let url = artifact_url(&server);
    mock_manifest(
        &server,
        serde_json::json!({ "version": LATEST_VERSION, "platforms": {} }),
    )
    .await;
    mock_release_api(&server, release_json(LATEST_VERSION, &url, 1)).await;

    let info = checker(&test_config(&server)).fetch_latest().await.unwrap();
    assert_eq!(info.source, ReleaseSource::ReleaseApi);
}

#[tokio::test]
async fn test_both_sources_failing_is_an_error() {
    let server = MockServer::start().await;
    mock_manifest_status(&server, 500).await;
    mock_release_api_status(&server, 503).await;

    let err = checker(&test_config(&server)).fetch_latest().await.unwrap_err();
    assert!(matches!(
        err.as_ref(),
        UpdateError::SourceStatus { status: 503, .. }
    ));
}

#[tokio::test]
async fn test_concurrent_checks_share_one_request() {
    let server = MockServer::start().await;
    let url = artifact_url(&server);
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(manifest_json(LATEST_VERSION, &url, "abc", 1))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let checker = checker(&test_config(&server));
    let other = checker.clone();
    let (a, b, c) = tokio::join!(
        checker.fetch_latest(),
        other.fetch_latest(),
        checker.fetch_latest()
    );

    assert_eq!(a.unwrap().version, LATEST_VERSION);
    assert_eq!(b.unwrap().version, LATEST_VERSION);
    assert_eq!(c.unwrap().version, LATEST_VERSION);
    server.verify().await;
}

#[tokio::test]
async fn test_service_reports_available_update() {
    let server = MockServer::start().await;
    mock_downloadable_release(&server, &payload(1024)).await;
    let env = start_service(&server);

    let info = env.service.check_update().await.unwrap().unwrap();

    assert_eq!(info.version, LATEST_VERSION);
    let snapshot = env.service.state();
    assert_eq!(snapshot.state, UpdateState::Available);
    assert_eq!(snapshot.latest_version.as_deref(), Some(LATEST_VERSION));
    assert_eq!(snapshot.total_bytes, 1024);
    assert_eq!(
        env.host.states(),
        vec![UpdateState::Checking, UpdateState::Available]
    );
}

#[tokio::test]
async fn test_service_idle_when_up_to_date() {
    let server = MockServer::start().await;
    let url = artifact_url(&server);
    mock_manifest(&server, manifest_json("v1.1.11", &url, "abc", 1)).await;
    let env = start_service(&server);

    assert!(env.service.check_update().await.unwrap().is_none());
    assert_eq!(env.service.state().state, UpdateState::Idle);
}

#[tokio::test]
async fn test_service_check_failure_sets_error() {
    let server = MockServer::start().await;
    mock_manifest_status(&server, 500).await;
    mock_release_api_status(&server, 500).await;
    let env = start_service(&server);

    assert!(env.service.check_update().await.is_err());

    let snapshot = env.service.state();
    assert_eq!(snapshot.state, UpdateState::Error);
    assert_eq!(snapshot.error_op, Some(codeswitch_update::ErrorOp::Check));
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn test_dismissed_version_is_not_offered_and_persists() {
    let server = MockServer::start().await;
    mock_downloadable_release(&server, &payload(64)).await;
    let env = start_service(&server);

    env.service.check_update().await.unwrap();
    env.service.dismiss_update(LATEST_VERSION).unwrap();
    assert_eq!(env.service.state().state, UpdateState::Idle);

    assert!(env.service.check_update().await.unwrap().is_none());
    assert_eq!(env.service.state().state, UpdateState::Idle);

    // A fresh service picks the dismissal up from disk
    let restarted = UpdateService::new(
        options_for(&server, &env.temp, CURRENT_VERSION),
        Arc::new(RecordingHost::default()),
    )
    .unwrap();
    assert_eq!(restarted.dismissed_version().as_deref(), Some(LATEST_VERSION));
    assert!(restarted.check_update().await.unwrap().is_none());
}

#[tokio::test]
async fn test_newer_than_dismissed_is_offered() {
    let server = MockServer::start().await;
    let url = artifact_url(&server);
    mock_manifest(&server, manifest_json("v1.3.0", &url, "abc", 1)).await;
    let env = start_service(&server);

    env.service.dismiss_update(LATEST_VERSION).unwrap();
    let info = env.service.check_update().await.unwrap();
    assert_eq!(info.map(|i| i.version).as_deref(), Some("v1.3.0"));
}

#[test]
fn test_service_requires_runtime() {
    let temp = TempDir::new().unwrap();
    let options = codeswitch_update::ServiceOptions::new(
        CURRENT_VERSION,
        temp.path().join("update"),
        RuntimeConfig::default(),
        temp.path().join("bin").join("CodeSwitch.AppImage"),
    );
    let result = UpdateService::new(options, Arc::new(RecordingHost::default()));
    assert!(matches!(result, Err(UpdateError::NoRuntime)));
}
