//! Streaming download with retry and progress reporting

use crate::client::NetClient;
use apkforge_errors::{ArchiveError, Error, NetworkError, Result};
use apkforge_events::{AppEvent, DownloadEvent, EventEmitter, EventSender, ProgressTracker};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Download policy
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Total attempts per fetch, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Timeout for a single body chunk.
    pub chunk_timeout: Duration,
    /// Maximum accepted file size.
    pub max_file_size: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            chunk_timeout: Duration::from_secs(30),
            max_file_size: 2 * 1024 * 1024 * 1024, // 2 GiB
        }
    }
}

/// Result of a completed, validated download
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub size: u64,
    /// blake3 digest of the streamed bytes.
    pub hash: String,
    pub attempts: u32,
}

/// Deletes the partial destination file unless disarmed. Covers failed
/// attempts and caller cancellation at any await point.
struct PartialFileGuard<'a> {
    path: &'a Path,
    armed: bool,
}

impl Drop for PartialFileGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(self.path);
        }
    }
}

/// Archive downloader with fixed-delay retry
#[derive(Debug, Clone)]
pub struct Downloader {
    client: NetClient,
    config: DownloadConfig,
}

impl Downloader {
    #[must_use]
    pub fn new(client: NetClient, config: DownloadConfig) -> Self {
        Self { client, config }
    }

    /// Create with default client and policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(NetClient::with_defaults()?, DownloadConfig::default()))
    }

    /// Download `url` to `dest`, retrying with a fixed back-off, and hand
    /// the finished file to archive validation before reporting it
    /// usable.
    ///
    /// # Errors
    ///
    /// Returns the last failure reason once all attempts are exhausted;
    /// non-retryable errors (bad URL, unsupported protocol) fail
    /// immediately. The partial destination file is deleted on every
    /// failure path.
    pub async fn fetch(&self, url: &str, dest: &Path, tx: &EventSender) -> Result<DownloadResult> {
        validate_url(url)?;

        let mut last_error: Option<Error> = None;
        for attempt in 1..=self.config.max_attempts.max(1) {
            match self.try_fetch(url, dest, tx).await {
                Ok(mut result) => {
                    result.attempts = attempt;
                    tx.emit(AppEvent::Download(DownloadEvent::Completed {
                        url: url.to_string(),
                        size: result.size,
                    }));
                    return Ok(result);
                }
                Err(err) => {
                    if !retryable(&err) {
                        tx.emit(AppEvent::Download(DownloadEvent::Failed {
                            url: url.to_string(),
                            error: err.to_string(),
                            attempts: attempt,
                        }));
                        return Err(err);
                    }
                    last_error = Some(err);
                    if attempt < self.config.max_attempts {
                        tx.emit(AppEvent::Download(DownloadEvent::Retrying {
                            url: url.to_string(),
                            attempt,
                            max_attempts: self.config.max_attempts,
                            delay: self.config.retry_delay,
                        }));
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            NetworkError::RetriesExhausted {
                url: url.to_string(),
                attempts: self.config.max_attempts,
            }
            .into()
        });
        tx.emit(AppEvent::Download(DownloadEvent::Failed {
            url: url.to_string(),
            error: err.to_string(),
            attempts: self.config.max_attempts,
        }));
        Err(err)
    }

    async fn try_fetch(&self, url: &str, dest: &Path, tx: &EventSender) -> Result<DownloadResult> {
        let mut guard = PartialFileGuard {
            path: dest,
            armed: true,
        };

        let response = self.client.get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::HttpError {
                status: status.as_u16(),
                message: status.to_string(),
            }
            .into());
        }

        let total_size = response.content_length();
        if let Some(size) = total_size {
            if size > self.config.max_file_size {
                return Err(NetworkError::DownloadFailed(format!(
                    "{size} bytes exceeds limit"
                ))
                .into());
            }
        }

        tx.emit(AppEvent::Download(DownloadEvent::Started {
            url: url.to_string(),
            total_size,
        }));

        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = blake3::Hasher::new();
        let mut tracker = ProgressTracker::new(total_size);
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::time::timeout(self.config.chunk_timeout, stream.next()).await;
            match chunk {
                Ok(Some(chunk)) => {
                    let chunk =
                        chunk.map_err(|e| NetworkError::DownloadFailed(e.to_string()))?;
                    hasher.update(&chunk);
                    file.write_all(&chunk).await?;
                    downloaded += chunk.len() as u64;
                    if downloaded > self.config.max_file_size {
                        return Err(NetworkError::DownloadFailed(
                            "response exceeds size limit".to_string(),
                        )
                        .into());
                    }
                    if let Some(snapshot) = tracker.update(downloaded) {
                        tx.emit(AppEvent::Download(DownloadEvent::Progress {
                            url: url.to_string(),
                            bytes_downloaded: snapshot.bytes,
                            total_bytes: snapshot.total,
                            speed_bps: snapshot.speed_bps,
                            eta: snapshot.eta,
                        }));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(NetworkError::Timeout {
                        url: url.to_string(),
                    }
                    .into());
                }
            }
        }

        file.flush().await?;
        drop(file);

        let final_snapshot = tracker.finish(downloaded);
        tx.emit(AppEvent::Download(DownloadEvent::Progress {
            url: url.to_string(),
            bytes_downloaded: final_snapshot.bytes,
            total_bytes: final_snapshot.total,
            speed_bps: final_snapshot.speed_bps,
            eta: final_snapshot.eta,
        }));

        // The file is only usable once it passes archive validation;
        // validate deletes it otherwise, so a retry starts clean.
        if !apkforge_archive::validate(dest) {
            return Err(ArchiveError::Invalid {
                path: dest.display().to_string(),
                message: "downloaded file failed validation".to_string(),
            }
            .into());
        }

        guard.armed = false;
        Ok(DownloadResult {
            path: dest.to_path_buf(),
            size: downloaded,
            hash: hasher.finalize().to_hex().to_string(),
            attempts: 0,
        })
    }
}

/// Corrupt downloads are retried alongside network failures; everything
/// the downloader can surface besides a malformed request is transient.
fn retryable(err: &Error) -> bool {
    match err {
        Error::Archive(ArchiveError::Invalid { .. }) => true,
        other => other.is_retryable(),
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(NetworkError::UnsupportedProtocol {
            protocol: scheme.to_string(),
        }
        .into()),
    }
}
