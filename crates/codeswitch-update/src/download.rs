//! Resumable, integrity-checked artifact download
//!
//! A transfer is checkpointed in `download_state.json` so an interrupted or
//! cancelled download continues where it stopped. Resume uses `Range` with an
//! `If-Range` validator; when the remote artifact changed, or the server cannot
//! honour the range, the partial file is discarded and the download restarts.

use crate::error::{Result, UpdateError};
use crate::extract::{extract_bundle, ArchiveKind};
use crate::state::{DownloadState, ReadyArtifact, UpdateInfo};
use crate::store::{remove_path, UpdateStore};
use crate::verify::verify_sha256;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{
    HeaderMap, ACCEPT_ENCODING, CONTENT_RANGE, ETAG, IF_RANGE, LAST_MODIFIED, RANGE,
};
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Suffix of the in-progress file next to the final artifact
const PARTIAL_SUFFIX: &str = ".download";

/// Fallback artifact name when the URL has no usable last segment
const FALLBACK_FILE_NAME: &str = "update.bin";

/// Origins a download (and every redirect it follows) may come from
#[derive(Debug, Clone)]
pub struct UrlAllowList {
    prefixes: Vec<String>,
}

impl UrlAllowList {
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        self.prefixes
            .iter()
            .any(|prefix| parsed.as_str().starts_with(prefix.as_str()))
    }

    pub fn check(&self, url: &str) -> Result<()> {
        if self.is_allowed(url) {
            Ok(())
        } else {
            Err(UpdateError::url_not_allowed(url))
        }
    }
}

/// How a download call ended without error
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Artifact verified and in place
    Completed(ReadyArtifact),
    /// Stopped on request; the checkpoint holds `downloaded` bytes
    Cancelled { downloaded: u64 },
}

enum Transfer {
    Finished,
    Cancelled,
}

enum Step {
    Cancelled,
    Chunk(reqwest::Result<Bytes>),
    End,
}

/// Remote validators captured before the transfer
#[derive(Debug, Default)]
struct Validators {
    etag: String,
    last_modified: String,
}

impl Validators {
    fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            etag: get(ETAG),
            last_modified: get(LAST_MODIFIED),
        }
    }
}

/// Downloads release artifacts into the update data directory
#[derive(Clone)]
pub struct DownloadManager {
    client: Client,
    store: UpdateStore,
    allow_list: UrlAllowList,
    buffer_size: usize,
}

impl DownloadManager {
    pub fn new(client: Client, store: UpdateStore, allow_list: UrlAllowList, buffer_size: usize) -> Self {
        Self {
            client,
            store,
            allow_list,
            buffer_size,
        }
    }

    pub fn allow_list(&self) -> &UrlAllowList {
        &self.allow_list
    }

    /// Download, verify and stage `info`'s artifact.
    ///
    /// `on_progress(downloaded, total)` is called for every received chunk.
    /// Cancellation is not an error: the checkpoint is saved and
    /// [`DownloadOutcome::Cancelled`] returned.
    pub async fn download<F>(
        &self,
        info: &UpdateInfo,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<DownloadOutcome>
    where
        F: FnMut(u64, u64) + Send,
    {
        self.allow_list.check(&info.download_url)?;

        let downloads_dir = self.store.downloads_dir();
        tokio::fs::create_dir_all(&downloads_dir).await?;

        let file_name = artifact_file_name(&info.download_url);
        let final_path = downloads_dir.join(&file_name);
        let temp_path = downloads_dir.join(format!("{}{}", file_name, PARTIAL_SUFFIX));

        let mut state = self.resume_state(info, &temp_path).await;

        if info.size > 0 && state.downloaded_bytes == info.size {
            info!("Partial download already complete, verifying");
            on_progress(info.size, info.size);
            return self
                .finalize(info, &temp_path, final_path)
                .await
                .map(DownloadOutcome::Completed);
        }

        let remote = self.probe(&info.download_url).await?;
        if state.downloaded_bytes > 0 && validators_changed(&state, &remote) {
            info!("Remote artifact changed since the last session, restarting download");
            remove_path(&temp_path);
            state.downloaded_bytes = 0;
        }
        state.etag = remote.etag;
        state.last_modified = remote.last_modified;
        self.store.save_download_state(&state)?;

        match self
            .transfer(&mut state, &temp_path, cancel, &mut on_progress)
            .await?
        {
            Transfer::Cancelled => {
                self.store.save_download_state(&state)?;
                info!(
                    "Download cancelled at {} bytes, progress saved",
                    state.downloaded_bytes
                );
                Ok(DownloadOutcome::Cancelled {
                    downloaded: state.downloaded_bytes,
                })
            }
            Transfer::Finished => self
                .finalize(info, &temp_path, final_path)
                .await
                .map(DownloadOutcome::Completed),
        }
    }

    /// Load the checkpoint for this URL and reconcile it with the partial file
    async fn resume_state(&self, info: &UpdateInfo, temp_path: &Path) -> DownloadState {
        let fresh = DownloadState {
            url: info.download_url.clone(),
            expected_sha256: info.sha256.trim().to_lowercase(),
            expected_size: info.size,
            etag: String::new(),
            last_modified: String::new(),
            downloaded_bytes: 0,
            temp_file_path: temp_path.to_path_buf(),
        };

        let on_disk = tokio::fs::metadata(temp_path).await.map(|m| m.len()).ok();
        let persisted = self.store.load_download_state().filter(|s| {
            s.url == info.download_url
                && s.temp_file_path == temp_path
                && s.expected_sha256.eq_ignore_ascii_case(info.sha256.trim())
        });

        match (persisted, on_disk) {
            (Some(saved), Some(len))
                if saved.downloaded_bytes == len && (info.size == 0 || len <= info.size) =>
            {
                debug!("Resuming download at byte {}", len);
                DownloadState {
                    etag: saved.etag,
                    last_modified: saved.last_modified,
                    downloaded_bytes: len,
                    ..fresh
                }
            }
            (_, Some(len)) => {
                if info.size > 0 && len > info.size {
                    warn!(
                        "Partial download is larger than expected ({} > {}), discarding",
                        len, info.size
                    );
                } else {
                    debug!("No matching checkpoint for partial file, discarding");
                }
                remove_path(temp_path);
                fresh
            }
            (_, None) => fresh,
        }
    }

    /// HEAD the artifact for validators, checking where redirects lead
    async fn probe(&self, url: &str) -> Result<Validators> {
        let response = self.client.head(url).send().await?;
        self.allow_list.check(response.url().as_str())?;

        if !response.status().is_success() {
            warn!(
                "HEAD {} returned HTTP {}, continuing without validators",
                url,
                response.status()
            );
            return Ok(Validators::default());
        }
        Ok(Validators::from_headers(response.headers()))
    }

    async fn send_get(
        &self,
        state: &DownloadState,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<Response>> {
        let mut request = self
            .client
            .get(&state.url)
            .header(ACCEPT_ENCODING, "identity");

        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
            let validator = if !state.etag.is_empty() {
                Some(&state.etag)
            } else if !state.last_modified.is_empty() {
                Some(&state.last_modified)
            } else {
                None
            };
            if let Some(validator) = validator {
                request = request.header(IF_RANGE, validator.as_str());
            }
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            response = request.send() => response?,
        };
        self.allow_list.check(response.url().as_str())?;
        Ok(Some(response))
    }

    /// Open the body stream. Returns the response and whether to append.
    async fn open_stream(
        &self,
        state: &mut DownloadState,
        temp_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<(Response, bool)>> {
        let offset = state.downloaded_bytes;
        let Some(response) = self.send_get(state, offset, cancel).await? else {
            return Ok(None);
        };

        let status = response.status();
        if status == StatusCode::OK {
            if offset > 0 {
                debug!("Server sent the full artifact, restarting from byte 0");
            }
            state.downloaded_bytes = 0;
            return Ok(Some((response, false)));
        }

        let range_failure =
            status == StatusCode::PARTIAL_CONTENT || status == StatusCode::RANGE_NOT_SATISFIABLE;
        if offset == 0 || !range_failure {
            return Err(UpdateError::UnexpectedStatus(status.as_u16()));
        }

        if status == StatusCode::PARTIAL_CONTENT
            && content_range_matches(response.headers(), offset, state.expected_size)
        {
            debug!("Server resumed at byte {}", offset);
            return Ok(Some((response, true)));
        }

        warn!(
            "Server could not resume at byte {} (HTTP {}), restarting download",
            offset, status
        );
        drop(response);
        remove_path(temp_path);
        state.downloaded_bytes = 0;

        let Some(response) = self.send_get(state, 0, cancel).await? else {
            return Ok(None);
        };
        if response.status() == StatusCode::OK {
            Ok(Some((response, false)))
        } else {
            Err(UpdateError::UnexpectedStatus(response.status().as_u16()))
        }
    }

    async fn transfer<F>(
        &self,
        state: &mut DownloadState,
        temp_path: &Path,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<Transfer>
    where
        F: FnMut(u64, u64) + Send,
    {
        let Some((response, append)) = self.open_stream(state, temp_path, cancel).await? else {
            return Ok(Transfer::Cancelled);
        };

        let total = if state.expected_size > 0 {
            state.expected_size
        } else {
            response
                .content_length()
                .map(|len| len + state.downloaded_bytes)
                .unwrap_or(0)
        };

        let mut file = if append {
            OpenOptions::new().append(true).open(temp_path).await?
        } else {
            File::create(temp_path).await?
        };

        info!(
            "Downloading {} from byte {} of {}",
            state.url, state.downloaded_bytes, total
        );
        on_progress(state.downloaded_bytes, total);

        let mut stream = response.bytes_stream();
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                next = stream.next() => match next {
                    Some(chunk) => Step::Chunk(chunk),
                    None => Step::End,
                },
            };

            match step {
                Step::Cancelled => {
                    file.flush().await?;
                    return Ok(Transfer::Cancelled);
                }
                Step::Chunk(Ok(chunk)) => {
                    file.write_all(&chunk).await?;
                    state.downloaded_bytes += chunk.len() as u64;

                    if state.expected_size > 0 && state.downloaded_bytes > state.expected_size {
                        drop(file);
                        remove_path(temp_path);
                        self.store.clear_download_state();
                        return Err(UpdateError::Oversized {
                            downloaded: state.downloaded_bytes,
                            expected: state.expected_size,
                        });
                    }
                    on_progress(state.downloaded_bytes, total);
                }
                Step::Chunk(Err(e)) => {
                    file.flush().await?;
                    self.checkpoint(state);
                    return Err(e.into());
                }
                Step::End => break,
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if state.expected_size > 0 && state.downloaded_bytes < state.expected_size {
            self.checkpoint(state);
            return Err(UpdateError::Incomplete {
                downloaded: state.downloaded_bytes,
                expected: state.expected_size,
            });
        }

        Ok(Transfer::Finished)
    }

    fn checkpoint(&self, state: &DownloadState) {
        match self.store.save_download_state(state) {
            Ok(()) => debug!("Saved download checkpoint at byte {}", state.downloaded_bytes),
            Err(e) => warn!("Failed to save download checkpoint: {}", e),
        }
    }

    /// Verify the digest, move the artifact into place and unpack bundles
    async fn finalize(&self, info: &UpdateInfo, temp_path: &Path, final_path: PathBuf) -> Result<ReadyArtifact> {
        if let Err(e) = verify_sha256(temp_path.to_path_buf(), &info.sha256, self.buffer_size).await {
            if matches!(e, UpdateError::ChecksumMismatch { .. }) {
                warn!("Checksum verification failed, discarding download: {}", e);
                remove_path(temp_path);
                self.store.clear_download_state();
            }
            return Err(e);
        }
        info!("Checksum verified for {}", info.version);

        move_into_place(temp_path, &final_path).await?;
        let size = tokio::fs::metadata(&final_path).await?.len();

        let payload_path = match ArchiveKind::from_path(&final_path) {
            Some(kind) => {
                let root = extract_bundle(final_path.clone(), kind, self.store.extracted_dir()).await?;
                info!("Extracted update bundle to {:?}", root);
                root
            }
            None => final_path.clone(),
        };

        self.store.clear_download_state();

        Ok(ReadyArtifact {
            archive_path: final_path,
            payload_path,
            sha256: info.sha256.trim().to_lowercase(),
            size,
        })
    }
}

fn validators_changed(state: &DownloadState, remote: &Validators) -> bool {
    (!state.etag.is_empty() && state.etag != remote.etag)
        || (!state.last_modified.is_empty() && state.last_modified != remote.last_modified)
}

/// Check `Content-Range: bytes <start>-<end>/<total>` against what was asked
fn content_range_matches(headers: &HeaderMap, offset: u64, expected_size: u64) -> bool {
    let Some(value) = headers.get(CONTENT_RANGE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some((start, total)) = parse_content_range(value) else {
        return false;
    };
    start == offset && (expected_size == 0 || total == Some(expected_size))
}

/// Returns the start offset and, when known, the complete length
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, total))
}

/// Last URL path segment, or a fixed name when there is none
fn artifact_file_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Rename into place, copying across volumes when rename fails
async fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    remove_path(to);
    if let Err(e) = tokio::fs::rename(from, to).await {
        debug!("Rename {:?} -> {:?} failed ({}), copying instead", from, to, e);
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}
