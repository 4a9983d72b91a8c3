//! SHA-256 verification of downloaded artifacts

use crate::error::{Result, UpdateError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Lowercase hex SHA-256 of a file, read in `buffer_size` chunks
pub fn sha256_file(path: &Path, buffer_size: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size.max(4096)];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare two hex digests, ignoring case and surrounding whitespace
pub fn digests_match(expected: &str, actual: &str) -> bool {
    let expected = expected.trim();
    !expected.is_empty() && expected.eq_ignore_ascii_case(actual.trim())
}

/// Hash `path` on the blocking pool and compare against `expected`
pub async fn verify_sha256(path: PathBuf, expected: &str, buffer_size: usize) -> Result<()> {
    let actual = tokio::task::spawn_blocking(move || sha256_file(&path, buffer_size))
        .await
        .map_err(|e| UpdateError::Io(io::Error::other(e)))??;

    if digests_match(expected, &actual) {
        Ok(())
    } else {
        Err(UpdateError::ChecksumMismatch {
            expected: expected.trim().to_lowercase(),
            actual,
        })
    }
}
