//! Local model store
//!
//! The models directory is the source of truth; the in-memory list is a cache of
//! the last `scan()`.
//!
//! Anything that writes `<filename>.tmp` or renames onto `<filename>` must hold
//! the write claim for that filename (`try_claim` / `release`). Downloads and
//! imports of the same filename are mutually exclusive.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::download::{temp_path_for, TEMP_SUFFIX};
use crate::types::{CatalogSnapshot, LocalModel};

/// File extensions recognized as model weights
pub const MODEL_EXTENSIONS: &[&str] = &["gguf", "bin"];

/// Marker file holding the active model id
pub const ACTIVE_MARKER: &str = ".active_model";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("A model named {0} already exists")]
    AlreadyExists(String),

    #[error("{0} is being written by another download or import")]
    InUse(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Disk usage of the models directory
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StorageInfo {
    pub models_dir: PathBuf,
    pub model_count: usize,
    pub models_bytes: u64,
    /// `None` when the backing disk cannot be identified
    pub available_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
}

pub struct LocalModelStore {
    models_dir: PathBuf,
    models: RwLock<Vec<LocalModel>>,
    catalog_filenames: RwLock<HashSet<String>>,
    claims: Mutex<HashSet<String>>,
}

impl LocalModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            models: RwLock::new(Vec::new()),
            catalog_filenames: RwLock::new(HashSet::new()),
            claims: Mutex::new(HashSet::new()),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Final on-disk path for a catalog filename
    pub fn model_path(&self, filename: &str) -> PathBuf {
        self.models_dir.join(filename)
    }

    /// Take the write claim for `filename`. `false` if someone else holds it.
    pub fn try_claim(&self, filename: &str) -> bool {
        self.lock_claims().insert(filename.to_string())
    }

    pub fn release(&self, filename: &str) {
        self.lock_claims().remove(filename);
    }

    /// Filenames currently claimed for writing
    pub fn claimed(&self) -> HashSet<String> {
        self.lock_claims().clone()
    }

    fn lock_claims(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.claims.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn marker_path(&self) -> PathBuf {
        self.models_dir.join(ACTIVE_MARKER)
    }

    /// Remember which filenames the latest catalog advertises
    pub fn set_catalog(&self, snapshot: &CatalogSnapshot) {
        let filenames: HashSet<String> = snapshot.entries.iter().map(|e| e.filename.clone()).collect();

        let mut models = self.models.write().unwrap_or_else(|err| err.into_inner());
        for model in models.iter_mut() {
            model.is_from_catalog = model.filename().is_some_and(|f| filenames.contains(f));
        }
        *self.catalog_filenames.write().unwrap_or_else(|err| err.into_inner()) = filenames;
    }

    /// Re-read the models directory, newest first
    pub async fn scan(&self) -> Result<Vec<LocalModel>, StoreError> {
        tokio::fs::create_dir_all(&self.models_dir)
            .await
            .map_err(|e| StoreError::io(&self.models_dir, e))?;

        let active = self.read_marker().await;
        let catalog = self
            .catalog_filenames
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone();

        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.models_dir)
            .await
            .map_err(|e| StoreError::io(&self.models_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.models_dir, e))?
        {
            let path = entry.path();
            if !is_model_file(&path) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable model file");
                    continue;
                }
            };

            let (Some(stem), Some(filename)) = (
                path.file_stem().and_then(|s| s.to_str()).map(str::to_string),
                path.file_name().and_then(|s| s.to_str()).map(str::to_string),
            ) else {
                continue;
            };

            let date_added = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::UNIX_EPOCH);

            found.push(LocalModel {
                display_name: display_name(&stem),
                is_active: false,
                id: stem,
                is_from_catalog: catalog.contains(&filename),
                file_path: path,
                size_bytes: metadata.len(),
                date_added,
            });
        }

        // Files sharing a stem (`x.gguf`, `x.bin`) are identified by full filename
        let mut stems: HashMap<String, usize> = HashMap::new();
        for model in &found {
            *stems.entry(model.id.clone()).or_default() += 1;
        }
        for model in found.iter_mut() {
            if stems.get(&model.id).is_some_and(|&n| n > 1) {
                if let Some(filename) = model.filename().map(str::to_string) {
                    model.id = filename;
                }
            }
        }

        found.sort_by(|a, b| b.date_added.cmp(&a.date_added).then_with(|| a.id.cmp(&b.id)));

        let mut seen_active = false;
        for model in found.iter_mut() {
            model.is_active = !seen_active && active.as_deref() == Some(model.id.as_str());
            seen_active |= model.is_active;
        }

        debug!(count = found.len(), dir = %self.models_dir.display(), "Scanned models directory");
        *self.models.write().unwrap_or_else(|err| err.into_inner()) = found.clone();
        Ok(found)
    }

    /// Models from the last scan
    pub fn models(&self) -> Vec<LocalModel> {
        self.models.read().unwrap_or_else(|err| err.into_inner()).clone()
    }

    pub fn get(&self, id: &str) -> Option<LocalModel> {
        self.models
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn active(&self) -> Option<LocalModel> {
        self.models
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .iter()
            .find(|m| m.is_active)
            .cloned()
    }

    /// Make `id` the only active model and persist the choice
    pub async fn set_active(&self, id: &str) -> Result<LocalModel, StoreError> {
        if self.get(id).is_none() {
            self.scan().await?;
        }
        if self.get(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let marker = self.marker_path();
        tokio::fs::write(&marker, id)
            .await
            .map_err(|e| StoreError::io(&marker, e))?;

        let mut models = self.models.write().unwrap_or_else(|err| err.into_inner());
        let mut activated = None;
        for model in models.iter_mut() {
            model.is_active = activated.is_none() && model.id == id;
            if model.is_active {
                activated = Some(model.clone());
            }
        }

        info!(%id, "Active model changed");
        activated.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Delete the model's file. Returns `false` (and keeps the list) on failure.
    pub async fn delete(&self, model: &LocalModel) -> bool {
        if let Err(e) = tokio::fs::remove_file(&model.file_path).await {
            warn!(path = %model.file_path.display(), error = %e, "Failed to delete model");
            return false;
        }

        if model.is_active || self.read_marker().await.as_deref() == Some(model.id.as_str()) {
            if let Err(e) = tokio::fs::remove_file(self.marker_path()).await {
                debug!(error = %e, "No active marker to clear");
            }
        }

        self.models
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .retain(|m| m.file_path != model.file_path);

        info!(id = %model.id, "Model deleted");
        true
    }

    /// Copy an external byte stream into the store under a sanitized name.
    ///
    /// Never replaces an existing model and fails with `StoreError::InUse` while
    /// a download of the same filename is in flight.
    pub async fn import_external<R>(&self, reader: R, desired_name: &str) -> Result<LocalModel, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        let filename = sanitize_filename(desired_name);
        if !self.try_claim(&filename) {
            return Err(StoreError::InUse(filename));
        }
        let result = self.import_claimed(reader, &filename).await;
        self.release(&filename);

        let dest = result?;
        self.scan().await?;
        let id = self
            .models()
            .into_iter()
            .find(|m| m.file_path == dest)
            .map(|m| m.id)
            .unwrap_or_default();
        self.get(&id).ok_or(StoreError::NotFound(filename))
    }

    async fn import_claimed<R>(&self, mut reader: R, filename: &str) -> Result<PathBuf, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        tokio::fs::create_dir_all(&self.models_dir)
            .await
            .map_err(|e| StoreError::io(&self.models_dir, e))?;

        let dest = self.model_path(filename);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Err(StoreError::AlreadyExists(filename.to_string()));
        }

        let temp = temp_path_for(&dest);
        let copied = async {
            let file = tokio::fs::File::create(&temp).await?;
            let mut writer = BufWriter::new(file);
            let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
            writer.flush().await?;
            writer.into_inner().sync_all().await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;

        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(StoreError::io(&temp, e));
            }
        };

        // hard_link fails instead of replacing a file that appeared meanwhile
        match tokio::fs::hard_link(&temp, &dest).await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&temp).await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(StoreError::AlreadyExists(filename.to_string()));
            }
            Err(e) => {
                debug!(error = %e, "Hard link unsupported, renaming");
                if let Err(e) = tokio::fs::rename(&temp, &dest).await {
                    let _ = tokio::fs::remove_file(&temp).await;
                    return Err(StoreError::io(&dest, e));
                }
            }
        }

        info!(%filename, bytes, "Imported external model");
        Ok(dest)
    }

    /// Remove leftover temp files, except those of claimed filenames
    pub async fn cleanup_temp_files(&self) -> Result<usize, StoreError> {
        let in_use = self.claimed();
        let mut entries = match tokio::fs::read_dir(&self.models_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.models_dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.models_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(target) = name.strip_suffix(TEMP_SUFFIX) else {
                continue;
            };
            if in_use.contains(target) {
                debug!(file = %name, "Keeping temp file of active write");
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to remove temp file"),
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up temp files");
        }
        Ok(removed)
    }

    /// Model totals from the last scan plus free space on the backing disk
    pub async fn storage_info(&self) -> StorageInfo {
        let models = self.models();
        let dir = self.models_dir.clone();
        let space = tokio::task::spawn_blocking(move || disk_space(&dir))
            .await
            .ok()
            .flatten();

        StorageInfo {
            models_dir: self.models_dir.clone(),
            model_count: models.len(),
            models_bytes: models.iter().map(|m| m.size_bytes).sum(),
            available_bytes: space.map(|(available, _)| available),
            total_bytes: space.map(|(_, total)| total),
        }
    }

    async fn read_marker(&self) -> Option<String> {
        tokio::fs::read_to_string(self.marker_path())
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| MODEL_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(ext)))
}

/// (available, total) bytes of the disk with the longest mount point containing `dir`
fn disk_space(dir: &Path) -> Option<(u64, u64)> {
    let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.available_space(), d.total_space()))
}

/// Replace anything outside `[A-Za-z0-9.-]` with `_` and force a `.gguf` extension
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();

    let mut cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        cleaned = "model".to_string();
    }
    if !cleaned.to_ascii_lowercase().ends_with(".gguf") {
        cleaned.push_str(".gguf");
    }
    cleaned
}

/// Human-friendly name from a file stem
pub fn display_name(stem: &str) -> String {
    stem.replace(['-', '_'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::embedded_catalog;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn write_model(dir: &Path, name: &str, bytes: &[u8], age_secs: u64) {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs)).unwrap();
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Model (v2).gguf"), "My_Model__v2_.gguf");
        assert_eq!(sanitize_filename("weights.bin"), "weights.bin.gguf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd.gguf");
        assert_eq!(sanitize_filename(".."), "model.gguf");
        assert_eq!(sanitize_filename("phi.GGUF"), "phi.GGUF");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("tinyllama-1.1b_chat"), "tinyllama 1.1b chat");
    }

    #[tokio::test]
    async fn test_scan_filters_and_sorts_newest_first() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), "old.gguf", b"aaaa", 3600);
        write_model(dir.path(), "new.bin", b"bb", 10);
        write_model(dir.path(), "partial.gguf.tmp", b"c", 0);
        write_model(dir.path(), "notes.txt", b"d", 0);

        let store = LocalModelStore::new(dir.path());
        let models = store.scan().await.unwrap();

        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(models[1].size_bytes, 4);
        assert!(models.iter().all(|m| !m.is_from_catalog && !m.is_active));
    }

    #[tokio::test]
    async fn test_scan_marks_catalog_models() {
        let dir = tempdir().unwrap();
        let catalog = embedded_catalog();
        let filename = catalog.entries[0].filename.clone();
        write_model(dir.path(), &filename, b"weights", 0);
        write_model(dir.path(), "custom.gguf", b"weights", 0);

        let store = LocalModelStore::new(dir.path());
        store.set_catalog(&catalog);
        store.scan().await.unwrap();

        let from_catalog: Vec<_> = store
            .models()
            .into_iter()
            .filter(|m| m.is_from_catalog)
            .filter_map(|m| m.filename().map(str::to_string))
            .collect();
        assert_eq!(from_catalog, vec![filename]);
    }

    #[tokio::test]
    async fn test_set_active_is_exclusive_and_persisted() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), "a.gguf", b"a", 20);
        write_model(dir.path(), "b.gguf", b"b", 10);

        let store = LocalModelStore::new(dir.path());
        store.scan().await.unwrap();

        store.set_active("a").await.unwrap();
        store.set_active("b").await.unwrap();
        let active: Vec<_> = store.models().into_iter().filter(|m| m.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "b");

        // Restored by a fresh store
        let reopened = LocalModelStore::new(dir.path());
        reopened.scan().await.unwrap();
        assert_eq!(reopened.active().unwrap().id, "b");

        assert!(matches!(store.set_active("zzz").await, Err(StoreError::NotFound(_))));
        assert_eq!(store.active().unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), "a.gguf", b"a", 0);

        let store = LocalModelStore::new(dir.path());
        store.scan().await.unwrap();
        store.set_active("a").await.unwrap();

        let model = store.get("a").unwrap();
        assert!(store.delete(&model).await);
        assert!(!model.file_path.exists());
        assert!(store.models().is_empty());
        assert!(!dir.path().join(ACTIVE_MARKER).exists());

        // Already gone: reported as failure, list untouched
        assert!(!store.delete(&model).await);
    }

    #[tokio::test]
    async fn test_import_external() {
        let dir = tempdir().unwrap();
        let store = LocalModelStore::new(dir.path().join("models"));

        let model = store
            .import_external(&b"external weights"[..], "My Model.bin")
            .await
            .unwrap();
        assert_eq!(model.filename(), Some("My_Model.bin.gguf"));
        assert_eq!(model.size_bytes, 16);
        assert!(!model.is_from_catalog);
        assert!(!store.models_dir().join("My_Model.bin.gguf.tmp").exists());

        let again = store.import_external(&b"x"[..], "My Model.bin").await;
        assert!(matches!(again, Err(StoreError::AlreadyExists(_))));
        assert_eq!(
            std::fs::read(store.models_dir().join("My_Model.bin.gguf")).unwrap(),
            b"external weights"
        );
        assert!(store.claimed().is_empty());
    }

    #[tokio::test]
    async fn test_import_refused_while_filename_claimed() {
        let dir = tempdir().unwrap();
        let store = LocalModelStore::new(dir.path());
        std::fs::write(dir.path().join("slow.gguf.tmp"), b"partial download").unwrap();

        assert!(store.try_claim("slow.gguf"));
        let result = store.import_external(&b"USER-IMPORT"[..], "slow.gguf").await;
        assert!(matches!(result, Err(StoreError::InUse(_))));
        assert_eq!(std::fs::read(dir.path().join("slow.gguf.tmp")).unwrap(), b"partial download");
        assert!(!dir.path().join("slow.gguf").exists());

        // Claims are exclusive until released
        assert!(!store.try_claim("slow.gguf"));
        store.release("slow.gguf");
        let model = store.import_external(&b"USER-IMPORT"[..], "slow.gguf").await.unwrap();
        assert_eq!(model.id, "slow");
        assert!(store.claimed().is_empty());
    }

    #[tokio::test]
    async fn test_shared_stems_use_full_filenames() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), "x.gguf", b"gguf", 20);
        write_model(dir.path(), "x.bin", b"binary", 10);
        write_model(dir.path(), "y.gguf", b"y", 0);

        let store = LocalModelStore::new(dir.path());
        store.scan().await.unwrap();

        assert!(store.get("x").is_none());
        assert_eq!(store.get("x.bin").unwrap().size_bytes, 6);
        assert_eq!(store.get("y").unwrap().size_bytes, 1);

        store.set_active("x.gguf").await.unwrap();
        let model = store.get("x.gguf").unwrap();
        assert!(store.delete(&model).await);
        assert!(dir.path().join("x.bin").exists());
        assert!(!dir.path().join("x.gguf").exists());
    }

    #[tokio::test]
    async fn test_cleanup_temp_files_skips_in_use() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), "busy.gguf.tmp", b"1", 0);
        write_model(dir.path(), "stale.gguf.tmp", b"2", 0);
        write_model(dir.path(), "kept.gguf", b"3", 0);

        let store = LocalModelStore::new(dir.path());
        assert!(store.try_claim("busy.gguf"));
        assert_eq!(store.cleanup_temp_files().await.unwrap(), 1);

        assert!(dir.path().join("busy.gguf.tmp").exists());
        assert!(!dir.path().join("stale.gguf.tmp").exists());
        assert!(dir.path().join("kept.gguf").exists());
    }

    #[tokio::test]
    async fn test_storage_info_counts_models() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), "a.gguf", b"1234", 0);
        write_model(dir.path(), "b.gguf", b"56", 0);

        let store = LocalModelStore::new(dir.path());
        store.scan().await.unwrap();
        let info = store.storage_info().await;
        assert_eq!(info.model_count, 2);
        assert_eq!(info.models_bytes, 6);
    }
}
