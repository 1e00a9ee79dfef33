//! ModelDepot - catalog-driven acquisition of local LLM model files
//!
//! - Catalog: fresh cache, then remote sources, then stale cache, then a built-in baseline
//! - Downloads: ranked mirrors, streamed with live progress and cancellation
//! - Store: SHA-256 verified files in a local models directory

pub mod catalog;
pub mod config;
pub mod download;
pub mod mirror;
pub mod store;
pub mod types;
pub mod verify;

pub use catalog::{embedded_catalog, parse_catalog, CatalogFetcher};
pub use config::Config;
pub use download::{DownloadCoordinator, DownloadEngine, DownloadError, StreamOutcome};
pub use mirror::MirrorSelector;
pub use store::{LocalModelStore, StorageInfo, StoreError};
pub use types::*;
pub use verify::IntegrityVerifier;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::info;

/// ModelDepot instance: catalog, downloads and local store wired from one `Config`
pub struct ModelDepot {
    config: Config,
    catalog: CatalogFetcher,
    store: Arc<LocalModelStore>,
    downloads: DownloadCoordinator,
    snapshot: RwLock<Option<CatalogSnapshot>>,
}

impl ModelDepot {
    /// Create a new ModelDepot instance
    pub fn new(config: Config) -> Result<Self> {
        let catalog = CatalogFetcher::new(&config)?;
        let store = Arc::new(LocalModelStore::new(config.models_dir()?));
        let downloads = DownloadCoordinator::from_config(&config.download, Arc::clone(&store))?;

        Ok(Self {
            config,
            catalog,
            store,
            downloads,
            snapshot: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LocalModelStore {
        &self.store
    }

    pub fn downloads(&self) -> &DownloadCoordinator {
        &self.downloads
    }

    pub fn fetcher(&self) -> &CatalogFetcher {
        &self.catalog
    }

    /// Resolve the catalog (cache first) and remember it
    pub async fn catalog(&self) -> CatalogSnapshot {
        let snapshot = self.catalog.fetch().await;
        self.remember(&snapshot).await;
        snapshot
    }

    /// Resolve the catalog from the network first
    pub async fn refresh_catalog(&self) -> CatalogSnapshot {
        let snapshot = self.catalog.refresh().await;
        self.remember(&snapshot).await;
        snapshot
    }

    /// Latest known catalog without touching the network
    pub async fn known_catalog(&self) -> CatalogSnapshot {
        if let Some(snapshot) = self.snapshot.read().await.clone() {
            return snapshot;
        }
        let snapshot = match self.catalog.cached().await {
            Some(snapshot) => snapshot,
            None => embedded_catalog(),
        };
        self.remember(&snapshot).await;
        snapshot
    }

    async fn remember(&self, snapshot: &CatalogSnapshot) {
        self.store.set_catalog(snapshot);
        *self.snapshot.write().await = Some(snapshot.clone());
    }

    /// Start (or join) the download of a catalog model
    pub async fn download(&self, model_id: &str) -> Result<watch::Receiver<DownloadState>> {
        let mut snapshot = self.snapshot.read().await.clone();
        if snapshot.as_ref().and_then(|s| s.find(model_id)).is_none() {
            snapshot = Some(self.catalog().await);
        }

        let entry = snapshot
            .as_ref()
            .and_then(|s| s.find(model_id))
            .with_context(|| format!("Model '{}' is not in the catalog", model_id))?;

        info!(model = %model_id, "Download requested");
        Ok(self.downloads.start(entry))
    }

    pub fn cancel(&self, model_id: &str) -> bool {
        self.downloads.cancel(model_id)
    }

    pub fn download_state(&self, model_id: &str) -> Option<DownloadState> {
        self.downloads.get(model_id)
    }

    /// Rescan the models directory against the latest known catalog
    pub async fn scan_models(&self) -> Result<Vec<LocalModel>> {
        self.known_catalog().await;
        Ok(self.store.scan().await?)
    }

    /// Delete a local model by id. Returns `false` when it is not on disk.
    pub async fn delete_model(&self, model_id: &str) -> Result<bool> {
        self.scan_models().await?;
        let Some(model) = self.store.get(model_id) else {
            return Ok(false);
        };
        if !self.store.delete(&model).await {
            anyhow::bail!("Failed to delete {}", model.file_path.display());
        }
        Ok(true)
    }

    pub async fn set_active(&self, model_id: &str) -> Result<LocalModel> {
        self.scan_models().await?;
        Ok(self.store.set_active(model_id).await?)
    }

    /// Remove leftover temp files that no running download or import owns
    pub async fn cleanup(&self) -> Result<usize> {
        Ok(self.store.cleanup_temp_files().await?)
    }

    pub async fn storage_info(&self) -> Result<StorageInfo> {
        self.scan_models().await?;
        Ok(self.store.storage_info().await)
    }
}
