//! Per-model download orchestration
//!
//! One `DownloadState` per model id, published on a `watch` channel. Every
//! state change is also broadcast on a shared event channel so observers that
//! must not miss intermediate states can follow along.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{finalize, DownloadEngine, StreamOutcome};
use super::{temp_path_for, DownloadError};
use crate::catalog::is_plain_filename;
use crate::config::DownloadConfig;
use crate::mirror::MirrorSelector;
use crate::store::LocalModelStore;
use crate::types::{CatalogEntry, DownloadState, DownloadStatus};
use crate::verify::IntegrityVerifier;

const EVENT_CAPACITY: usize = 1024;

struct ActiveDownload {
    state: Arc<watch::Sender<DownloadState>>,
    cancel: CancellationToken,
    filename: String,
}

impl ActiveDownload {
    fn snapshot(&self) -> DownloadState {
        self.state.borrow().clone()
    }

    fn is_active(&self) -> bool {
        self.state.borrow().status.is_active()
    }
}

enum Finished {
    Completed,
    Cancelled,
}

struct Inner {
    engine: DownloadEngine,
    verifier: IntegrityVerifier,
    selector: MirrorSelector,
    store: Arc<LocalModelStore>,
    max_mirror_attempts: usize,
    downloads: Mutex<HashMap<String, ActiveDownload>>,
    events: broadcast::Sender<DownloadState>,
}

/// Accepts download requests and tracks their state. Cheap to clone.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl DownloadCoordinator {
    pub fn new(
        engine: DownloadEngine,
        verifier: IntegrityVerifier,
        selector: MirrorSelector,
        store: Arc<LocalModelStore>,
        max_mirror_attempts: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                engine,
                verifier,
                selector,
                store,
                max_mirror_attempts: max_mirror_attempts.max(1),
                downloads: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn from_config(config: &DownloadConfig, store: Arc<LocalModelStore>) -> anyhow::Result<Self> {
        Ok(Self::new(
            DownloadEngine::new(config)?,
            IntegrityVerifier::new(),
            MirrorSelector::new(config.preferred_location),
            store,
            config.max_mirror_attempts,
        ))
    }

    /// Begin downloading `entry`, or join the download already in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, entry: &CatalogEntry) -> watch::Receiver<DownloadState> {
        let mut downloads = self.inner.lock_downloads();

        if let Some(existing) = downloads.get(&entry.id) {
            if existing.is_active() {
                debug!(model = %entry.id, "Download already in progress");
                return existing.state.subscribe();
            }
        }

        let rejection = if !is_plain_filename(&entry.filename) {
            Some(format!("Invalid filename: {}", entry.filename))
        } else if !self.inner.store.try_claim(&entry.filename) {
            Some(format!("{} is already being written", entry.filename))
        } else {
            None
        };

        let mut initial = DownloadState::pending(&entry.id);
        if let Some(reason) = &rejection {
            warn!(model = %entry.id, %reason, "Download rejected");
            initial.status = DownloadStatus::Failed;
            initial.error = Some(reason.clone());
        }

        let (tx, rx) = watch::channel(initial.clone());
        let tx = Arc::new(tx);
        let cancel = CancellationToken::new();
        downloads.insert(
            entry.id.clone(),
            ActiveDownload {
                state: tx.clone(),
                cancel: cancel.clone(),
                filename: entry.filename.clone(),
            },
        );
        drop(downloads);

        let _ = self.inner.events.send(initial);

        if rejection.is_none() {
            info!(model = %entry.id, filename = %entry.filename, "Download queued");
            let inner = self.inner.clone();
            let entry = entry.clone();
            tokio::spawn(async move { inner.run(entry, tx, cancel).await });
        }
        rx
    }

    /// Request cancellation. Returns whether an active download was signalled.
    pub fn cancel(&self, model_id: &str) -> bool {
        let downloads = self.inner.lock_downloads();
        match downloads.get(model_id) {
            Some(d) if d.is_active() => {
                info!(model = %model_id, "Cancelling download");
                d.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, model_id: &str) -> Option<DownloadState> {
        self.inner.lock_downloads().get(model_id).map(ActiveDownload::snapshot)
    }

    pub fn subscribe(&self, model_id: &str) -> Option<watch::Receiver<DownloadState>> {
        self.inner
            .lock_downloads()
            .get(model_id)
            .map(|d| d.state.subscribe())
    }

    pub fn list(&self) -> Vec<DownloadState> {
        let mut states: Vec<_> = self
            .inner
            .lock_downloads()
            .values()
            .map(ActiveDownload::snapshot)
            .collect();
        states.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        states
    }

    /// Forget a finished download. Active downloads are kept.
    pub fn clear(&self, model_id: &str) -> bool {
        let mut downloads = self.inner.lock_downloads();
        match downloads.get(model_id) {
            Some(d) if !d.is_active() => {
                downloads.remove(model_id);
                true
            }
            _ => false,
        }
    }

    /// Every state change of every download, in order per model
    pub fn events(&self) -> broadcast::Receiver<DownloadState> {
        self.inner.events.subscribe()
    }

}

impl Inner {
    fn lock_downloads(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveDownload>> {
        self.downloads.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn update(&self, state: &watch::Sender<DownloadState>, f: impl FnOnce(&mut DownloadState)) {
        state.send_modify(f);
        let _ = self.events.send(state.borrow().clone());
    }

    /// Runs with the store's write claim on `entry.filename` held; releases it
    /// before the terminal state is published.
    async fn run(self: Arc<Self>, entry: CatalogEntry, state: Arc<watch::Sender<DownloadState>>, cancel: CancellationToken) {
        let result = self.execute(&entry, &state, &cancel).await;
        self.store.release(&entry.filename);

        match result {
            Ok(Finished::Completed) => {
                info!(model = %entry.id, "Download completed");
                self.update(&state, |s| {
                    s.status = DownloadStatus::Completed;
                    s.speed_bytes_per_sec = 0;
                    s.eta_secs = None;
                });
            }
            Ok(Finished::Cancelled) => {
                self.update(&state, |s| {
                    s.status = DownloadStatus::Cancelled;
                    s.speed_bytes_per_sec = 0;
                    s.eta_secs = None;
                });
            }
            Err(e) => {
                error!(model = %entry.id, error = %e, "Download failed");
                self.update(&state, |s| {
                    s.status = DownloadStatus::Failed;
                    s.speed_bytes_per_sec = 0;
                    s.eta_secs = None;
                    s.error = Some(e.to_string());
                });
            }
        }
    }

    async fn execute(
        &self,
        entry: &CatalogEntry,
        state: &watch::Sender<DownloadState>,
        cancel: &CancellationToken,
    ) -> Result<Finished, DownloadError> {
        if cancel.is_cancelled() {
            return Ok(Finished::Cancelled);
        }

        let dest = self.store.model_path(&entry.filename);
        let temp = temp_path_for(&dest);

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            if let Some(finished) = self.check_existing(entry, &dest, state, cancel).await? {
                return Ok(finished);
            }
        }

        let mirrors = self.selector.rank(entry);
        if mirrors.is_empty() {
            return Err(DownloadError::NoMirror(entry.id.clone()));
        }

        let mut last_error = None;
        for (attempt, mirror) in mirrors.iter().take(self.max_mirror_attempts).enumerate() {
            if cancel.is_cancelled() {
                return Ok(Finished::Cancelled);
            }

            info!(model = %entry.id, mirror = %mirror.name, attempt = attempt + 1, "Downloading from mirror");
            // A new mirror restarts from zero
            self.update(state, |s| {
                s.status = DownloadStatus::Downloading;
                s.current_mirror = Some(mirror.name.clone());
                s.bytes_downloaded = 0;
                s.total_bytes = None;
                s.percentage = 0;
                s.speed_bytes_per_sec = 0;
                s.eta_secs = None;
            });

            let outcome = self
                .engine
                .stream(&mirror.url, &temp, cancel, |progress| {
                    self.update(state, |s| s.apply_progress(progress))
                })
                .await;

            match outcome {
                Ok(StreamOutcome::Completed { .. }) => {
                    return self.verify_and_finalize(entry, &temp, &dest, state, cancel).await;
                }
                Ok(StreamOutcome::Cancelled { .. }) => return Ok(Finished::Cancelled),
                Err(e) if e.is_retryable() => {
                    warn!(model = %entry.id, mirror = %mirror.name, error = %e, "Mirror failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| DownloadError::NoMirror(entry.id.clone())))
    }

    /// Verify a file that is already in place. `None` means it was bad and has
    /// been removed, so a fresh download should follow.
    async fn check_existing(
        &self,
        entry: &CatalogEntry,
        dest: &Path,
        state: &watch::Sender<DownloadState>,
        cancel: &CancellationToken,
    ) -> Result<Option<Finished>, DownloadError> {
        info!(model = %entry.id, path = %dest.display(), "Model file already present, verifying");
        self.update(state, |s| s.status = DownloadStatus::Verifying);

        let valid = self
            .verifier
            .verify(dest, entry.sha256.as_deref())
            .await
            .map_err(|source| DownloadError::Verify {
                path: dest.to_path_buf(),
                source,
            })?;

        if cancel.is_cancelled() {
            return Ok(Some(Finished::Cancelled));
        }

        if valid {
            let size = tokio::fs::metadata(dest)
                .await
                .map_err(|e| DownloadError::io(dest, e))?
                .len();
            self.update(state, |s| {
                s.bytes_downloaded = size;
                s.total_bytes = Some(size);
                s.percentage = 100;
            });
            self.refresh_store().await;
            return Ok(Some(Finished::Completed));
        }

        warn!(model = %entry.id, "Existing file failed verification, downloading again");
        tokio::fs::remove_file(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        self.refresh_store().await;
        Ok(None)
    }

    async fn verify_and_finalize(
        &self,
        entry: &CatalogEntry,
        temp: &Path,
        dest: &Path,
        state: &watch::Sender<DownloadState>,
        cancel: &CancellationToken,
    ) -> Result<Finished, DownloadError> {
        self.update(state, |s| {
            s.status = DownloadStatus::Verifying;
            s.speed_bytes_per_sec = 0;
            s.eta_secs = None;
        });

        let valid = match self.verifier.verify(temp, entry.sha256.as_deref()).await {
            Ok(valid) => valid,
            Err(source) => {
                discard(temp).await;
                return Err(DownloadError::Verify {
                    path: temp.to_path_buf(),
                    source,
                });
            }
        };

        if !valid {
            discard(temp).await;
            return Err(DownloadError::IntegrityMismatch {
                filename: entry.filename.clone(),
            });
        }

        if cancel.is_cancelled() {
            discard(temp).await;
            return Ok(Finished::Cancelled);
        }

        finalize(temp, dest).await?;
        self.refresh_store().await;
        Ok(Finished::Completed)
    }

    async fn refresh_store(&self) {
        if let Err(e) = self.store.scan().await {
            warn!(error = %e, "Failed to rescan models directory");
        }
    }
}

async fn discard(temp: &Path) {
    if let Err(e) = tokio::fs::remove_file(temp).await {
        debug!(path = %temp.display(), error = %e, "Temp file already gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DownloadMirror, MirrorKind, MirrorLocation};
    use tempfile::tempdir;

    fn coordinator(dir: &Path) -> DownloadCoordinator {
        let store = Arc::new(LocalModelStore::new(dir));
        DownloadCoordinator::from_config(&DownloadConfig::default(), store).unwrap()
    }

    fn entry(id: &str, filename: &str, mirrors: Vec<DownloadMirror>) -> CatalogEntry {
        let mut entry = crate::catalog::embedded_catalog().entries.remove(0);
        entry.id = id.to_string();
        entry.filename = filename.to_string();
        entry.mirrors = mirrors;
        entry
    }

    async fn finished(mut rx: watch::Receiver<DownloadState>) -> DownloadState {
        rx.wait_for(|s| s.status.is_terminal()).await.unwrap().clone()
    }

    #[tokio::test]
    async fn test_no_usable_mirror_fails() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let torrent_only = vec![DownloadMirror {
            name: "swarm".to_string(),
            url: "magnet:?xt=urn:btih:0".to_string(),
            priority: 1,
            location: MirrorLocation::Global,
            kind: MirrorKind::Torrent,
        }];

        let state = finished(coordinator.start(&entry("m", "m.gguf", torrent_only))).await;
        assert_eq!(state.status, DownloadStatus::Failed);
        assert!(state.error.unwrap().contains("No mirror"));
        assert!(!dir.path().join("m.gguf.tmp").exists());
    }

    #[tokio::test]
    async fn test_unsafe_filename_rejected() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(dir.path());

        let state = finished(coordinator.start(&entry("m", "../m.gguf", vec![]))).await;
        assert_eq!(state.status, DownloadStatus::Failed);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_existing_file_completes_without_network() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("m.gguf"), b"hello world").unwrap();
        let coordinator = coordinator(dir.path());

        let mut e = entry("m", "m.gguf", vec![]);
        e.sha256 = Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9".to_string());

        let state = finished(coordinator.start(&e)).await;
        assert_eq!(state.status, DownloadStatus::Completed);
        assert_eq!(state.bytes_downloaded, 11);
        assert_eq!(state.percentage, 100);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_claimed_filename_is_rejected_and_released() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let store = coordinator.inner.store.clone();

        assert!(store.try_claim("m.gguf"));
        let state = finished(coordinator.start(&entry("m", "m.gguf", vec![]))).await;
        assert_eq!(state.status, DownloadStatus::Failed);
        assert!(state.error.unwrap().contains("already being written"));
        // A rejected start must not drop someone else's claim
        assert!(store.claimed().contains("m.gguf"));

        store.release("m.gguf");
        let state = finished(coordinator.start(&entry("m", "m.gguf", vec![]))).await;
        assert_eq!(state.status, DownloadStatus::Failed);
        assert!(state.error.unwrap().contains("No mirror"));
        assert!(store.claimed().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_and_clear_bookkeeping() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(dir.path());

        assert!(!coordinator.cancel("unknown"));
        assert!(coordinator.get("unknown").is_none());
        assert!(!coordinator.clear("unknown"));

        let state = finished(coordinator.start(&entry("m", "../bad", vec![]))).await;
        assert_eq!(state.status, DownloadStatus::Failed);
        assert!(coordinator.inner.store.claimed().is_empty());

        // Terminal: cancel is a no-op, clear forgets it
        assert!(!coordinator.cancel("m"));
        assert_eq!(coordinator.list().len(), 1);
        assert!(coordinator.clear("m"));
        assert!(coordinator.list().is_empty());
    }
}
