//! Test constants

use sha2::{Digest, Sha256};

pub const CURRENT_VERSION: &str = "v1.1.11";
pub const LATEST_VERSION: &str = "v1.2.0";

pub const MANIFEST_PATH: &str = "/latest.json";
pub const RELEASE_API_PATH: &str = "/api/releases/latest";
pub const ARTIFACT_PATH: &str = "/releases/download/v1.2.0/CodeSwitch-v1.2.0.AppImage";
pub const ARTIFACT_NAME: &str = "CodeSwitch-v1.2.0.AppImage";

pub const ETAG_V1: &str = "\"artifact-v1\"";
pub const ETAG_V2: &str = "\"artifact-v2\"";

/// Deterministic, non-repeating-looking payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
