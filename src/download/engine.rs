//! Streamed HTTP download of a single file with throttled progress reporting

use anyhow::{Context, Result};
use futures_util::TryStreamExt;
use reqwest::header;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DownloadError;
use crate::config::DownloadConfig;
use crate::types::TransferProgress;

/// How a transfer ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every byte is in the temp file, ready for verification
    Completed { bytes: u64, total_bytes: Option<u64> },
    /// Stopped by the caller; the temp file is already gone
    Cancelled { bytes: u64 },
}

/// Downloads one URL into a temp file
pub struct DownloadEngine {
    client: reqwest::Client,
    chunk_size: usize,
    progress_interval: Duration,
    progress_bytes: u64,
}

impl DownloadEngine {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        // No overall timeout: multi-gigabyte bodies legitimately take a long time
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build download HTTP client")?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size.max(1),
            progress_interval: config.progress_interval(),
            progress_bytes: config.progress_bytes.max(1),
        })
    }

    /// Stream `url` into `temp_path`.
    ///
    /// `on_progress` fires once with zero bytes, then at most once per progress
    /// interval or byte threshold, and once more at end of stream with the exact
    /// byte count on disk. The temp file is removed on every outcome except
    /// `StreamOutcome::Completed`.
    pub async fn stream<F>(
        &self,
        url: &str,
        temp_path: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<StreamOutcome, DownloadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let result = self.transfer(url, temp_path, cancel, &mut on_progress).await;

        match &result {
            Ok(StreamOutcome::Completed { bytes, .. }) => {
                debug!(%url, bytes, "Transfer finished");
            }
            Ok(StreamOutcome::Cancelled { bytes }) => {
                info!(%url, bytes, "Transfer cancelled");
                remove_temp(temp_path).await;
            }
            Err(e) => {
                warn!(%url, error = %e, "Transfer failed");
                remove_temp(temp_path).await;
            }
        }
        result
    }

    async fn transfer<F>(
        &self,
        url: &str,
        temp_path: &Path,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<StreamOutcome, DownloadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        if cancel.is_cancelled() {
            return Ok(StreamOutcome::Cancelled { bytes: 0 });
        }

        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/octet-stream")
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled { bytes: 0 }),
            response = request => response.map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?,
        };

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total_bytes = response.content_length();
        info!(%url, total_bytes = ?total_bytes, "Starting transfer");

        if let Some(parent) = temp_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        let file = tokio::fs::File::create(temp_path)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        let mut writer = BufWriter::with_capacity(self.chunk_size * 8, file);

        let reader = StreamReader::new(response.bytes_stream().map_err(io::Error::other));
        tokio::pin!(reader);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut downloaded: u64 = 0;
        let mut meter = ProgressMeter::new(self.progress_interval, self.progress_bytes, Instant::now());

        on_progress(TransferProgress {
            bytes_downloaded: 0,
            total_bytes,
            speed_bytes_per_sec: 0,
        });

        loop {
            if cancel.is_cancelled() {
                return Ok(StreamOutcome::Cancelled { bytes: downloaded });
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled { bytes: downloaded }),
                read = reader.read(&mut buffer) => read.map_err(|source| DownloadError::Interrupted {
                    bytes: downloaded,
                    source,
                })?,
            };

            if read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| DownloadError::io(temp_path, e))?;
            downloaded += read as u64;

            if let Some(progress) = meter.tick(downloaded, total_bytes, Instant::now()) {
                on_progress(progress);
            }
        }

        writer.flush().await.map_err(|e| DownloadError::io(temp_path, e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;

        if let Some(expected) = total_bytes {
            if expected != downloaded {
                return Err(DownloadError::SizeMismatch {
                    expected,
                    actual: downloaded,
                });
            }
        }

        on_progress(meter.emit(downloaded, total_bytes, Instant::now()));

        Ok(StreamOutcome::Completed {
            bytes: downloaded,
            total_bytes,
        })
    }
}

/// Atomically move a verified temp file into place.
///
/// On failure the temp file is left where it is.
pub async fn finalize(temp_path: &Path, dest: &Path) -> Result<(), DownloadError> {
    tokio::fs::rename(temp_path, dest)
        .await
        .map_err(|source| DownloadError::Finalize {
            from: temp_path.to_path_buf(),
            to: dest.to_path_buf(),
            source,
        })?;
    info!(path = %dest.display(), "Model file finalized");
    Ok(())
}

async fn remove_temp(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed temp file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}

/// Decides when a progress report is due and computes the sliding speed
struct ProgressMeter {
    interval: Duration,
    threshold: u64,
    last_at: Instant,
    last_bytes: u64,
}

impl ProgressMeter {
    fn new(interval: Duration, threshold: u64, start: Instant) -> Self {
        Self {
            interval,
            threshold,
            last_at: start,
            last_bytes: 0,
        }
    }

    fn tick(&mut self, bytes: u64, total_bytes: Option<u64>, now: Instant) -> Option<TransferProgress> {
        let elapsed = now.saturating_duration_since(self.last_at);
        let pending = bytes.saturating_sub(self.last_bytes);
        if elapsed < self.interval && pending < self.threshold {
            return None;
        }
        Some(self.emit(bytes, total_bytes, now))
    }

    fn emit(&mut self, bytes: u64, total_bytes: Option<u64>, now: Instant) -> TransferProgress {
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        let delta = bytes.saturating_sub(self.last_bytes);
        let speed = if elapsed > 0.0 {
            (delta as f64 / elapsed) as u64
        } else {
            0
        };

        self.last_at = now;
        self.last_bytes = bytes;

        TransferProgress {
            bytes_downloaded: bytes,
            total_bytes,
            speed_bytes_per_sec: speed,
        }
    }
}
