//! Mock server helpers
//!
//! [`RangeResponder`] serves an artifact the way a CDN does: `ETag`,
//! `Accept-Ranges`, and `206 Partial Content` for `Range` requests whose
//! `If-Range` still matches.

use super::constants::*;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// How [`RangeResponder`] answers a `Range` request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeReply {
    /// `206` with a correct `Content-Range`
    Honor,
    /// `200` with the full body
    Ignore,
    /// `206` whose `Content-Range` starts one byte late
    WrongStart,
    /// `206` whose `Content-Range` reports a different complete length
    WrongTotal,
    /// `416` for every range
    Unsatisfiable,
}

#[derive(Clone)]
pub struct RangeResponder {
    body: Vec<u8>,
    etag: String,
    reply: RangeReply,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>, etag: &str) -> Self {
        Self {
            body,
            etag: etag.to_string(),
            reply: RangeReply::Honor,
        }
    }

    /// Always answer with the full body, like a server without range support
    pub fn ignoring_ranges(self) -> Self {
        self.replying(RangeReply::Ignore)
    }

    pub fn replying(mut self, reply: RangeReply) -> Self {
        self.reply = reply;
        self
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let base = ResponseTemplate::new(200)
            .insert_header("ETag", self.etag.as_str())
            .insert_header("Accept-Ranges", "bytes");

        if request.method.as_str() == "HEAD" {
            return base;
        }

        let len = self.body.len();
        let start = header_value(request, "range").and_then(|r| parse_range_start(&r));
        let validator_ok = header_value(request, "if-range").is_none_or(|v| v == self.etag);

        let Some(start) = start.filter(|_| validator_ok && self.reply != RangeReply::Ignore) else {
            return base.set_body_bytes(self.body.clone());
        };
        if start >= len || self.reply == RangeReply::Unsatisfiable {
            return ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{}", len).as_str());
        }

        let content_range = match self.reply {
            RangeReply::WrongStart => format!("bytes {}-{}/{}", start + 1, len - 1, len),
            RangeReply::WrongTotal => format!("bytes {}-{}/{}", start, len - 1, len + 1),
            _ => format!("bytes {}-{}/{}", start, len - 1, len),
        };
        ResponseTemplate::new(206)
            .insert_header("ETag", self.etag.as_str())
            .insert_header("Content-Range", content_range.as_str())
            .set_body_bytes(self.body[start..].to_vec())
    }
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn parse_range_start(value: &str) -> Option<usize> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, _) = spec.split_once('-')?;
    start.trim().parse().ok()
}

/// Absolute artifact URL on `server`
pub fn artifact_url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), ARTIFACT_PATH)
}

/// Manifest body advertising `version` for linux-x86_64
pub fn manifest_json(version: &str, url: &str, sha256: &str, size: u64) -> serde_json::Value {
    json!({
        "version": version,
        "pub_date": "2026-03-01T10:00:00Z",
        "notes": "Bug fixes and performance improvements",
        "platforms": {
            "linux-x86_64": { "url": url, "sha256": sha256, "size": size },
            "windows-x86_64": { "url": url, "sha256": sha256, "size": size }
        }
    })
}

/// Release listing body with a linux AppImage asset
pub fn release_json(tag: &str, url: &str, size: u64) -> serde_json::Value {
    json!({
        "tag_name": tag,
        "published_at": "2026-03-01T10:00:00Z",
        "body": "Release notes",
        "assets": [
            { "name": format!("CodeSwitch-{}.AppImage", tag), "browser_download_url": url, "size": size },
            { "name": format!("CodeSwitch-{}.exe", tag), "browser_download_url": url, "size": size }
        ]
    })
}

/// Serve `latest.json`
pub async fn mock_manifest(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Make `latest.json` answer with `status`
pub async fn mock_manifest_status(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Serve the release listing; only matches the versioned Accept header
pub async fn mock_release_api(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(RELEASE_API_PATH))
        .and(header("accept", "application/vnd.github.v3+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mock_release_api_status(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path(RELEASE_API_PATH))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Serve the artifact for both HEAD and GET
pub async fn mock_artifact(server: &MockServer, responder: RangeResponder) {
    Mock::given(path(ARTIFACT_PATH))
        .respond_with(responder)
        .mount(server)
        .await;
}

/// Manifest plus artifact for a downloadable `LATEST_VERSION`
pub async fn mock_downloadable_release(server: &MockServer, body: &[u8]) {
    let url = artifact_url(server);
    mock_manifest(
        server,
        manifest_json(LATEST_VERSION, &url, &sha256_hex(body), body.len() as u64),
    )
    .await;
    mock_artifact(server, RangeResponder::new(body.to_vec(), ETAG_V1)).await;
}

/// GET requests received for the artifact, as their `Range` headers
pub async fn artifact_range_requests(server: &MockServer) -> Vec<Option<String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.path() == ARTIFACT_PATH)
        .map(|r| header_value(r, "range"))
        .collect()
}
