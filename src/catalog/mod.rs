//! Model catalog retrieval
//!
//! Resolution order: fresh cache → remote sources (one at a time, first success
//! wins) → stale cache → embedded baseline. `fetch()` never fails.

mod embedded;

pub use embedded::{embedded_catalog, EMBEDDED_CATALOG_VERSION};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::types::{CatalogEntry, CatalogOrigin, CatalogSnapshot};
use crate::verify::is_valid_sha256;

pub const CACHE_FILE: &str = "model_catalog.json";
pub const TIMESTAMP_FILE: &str = "model_catalog_timestamp.txt";

/// Resolves the current model catalog
pub struct CatalogFetcher {
    client: reqwest::Client,
    sources: Vec<String>,
    cache_dir: PathBuf,
    ttl: chrono::Duration,
    /// Serializes cache writes
    cache_lock: Mutex<()>,
}

impl CatalogFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.catalog.request_timeout())
            .user_agent(config.download.user_agent.clone())
            .build()
            .context("Failed to build catalog HTTP client")?;

        Ok(Self {
            client,
            sources: config.catalog.sources.clone(),
            cache_dir: config.cache_dir()?,
            ttl: config.catalog.cache_ttl(),
            cache_lock: Mutex::new(()),
        })
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    pub fn timestamp_path(&self) -> PathBuf {
        self.cache_dir.join(TIMESTAMP_FILE)
    }

    /// Resolve the catalog as of now
    pub async fn fetch(&self) -> CatalogSnapshot {
        self.fetch_at(Utc::now()).await
    }

    /// Resolve the catalog as of `now` (cache expiry is judged against it)
    pub async fn fetch_at(&self, now: DateTime<Utc>) -> CatalogSnapshot {
        let cached = self.load_cache().await;

        if let Some(snapshot) = &cached {
            if now.signed_duration_since(snapshot.fetched_at) < self.ttl {
                info!(entries = snapshot.entries.len(), "Using cached model catalog");
                let mut snapshot = snapshot.clone();
                snapshot.origin = CatalogOrigin::Cache;
                return snapshot;
            }
            debug!(fetched_at = %snapshot.fetched_at, "Cached catalog expired");
        }

        self.resolve_remote(now, cached).await
    }

    /// Skip the fresh-cache check and go to the network first
    pub async fn refresh(&self) -> CatalogSnapshot {
        let now = Utc::now();
        let cached = self.load_cache().await;
        self.resolve_remote(now, cached).await
    }

    /// Whatever is in the cache, regardless of age, without network access
    pub async fn cached(&self) -> Option<CatalogSnapshot> {
        self.load_cache().await
    }

    async fn resolve_remote(
        &self,
        now: DateTime<Utc>,
        cached: Option<CatalogSnapshot>,
    ) -> CatalogSnapshot {
        for url in &self.sources {
            info!(%url, "Fetching model catalog");
            match self.fetch_remote(url).await {
                Ok(mut snapshot) => {
                    snapshot.fetched_at = now;
                    snapshot.origin = CatalogOrigin::Remote(url.clone());
                    if let Err(e) = self.save_cache(&snapshot).await {
                        warn!(error = %e, "Failed to cache model catalog");
                    }
                    info!(entries = snapshot.entries.len(), %url, "Fetched model catalog");
                    return snapshot;
                }
                Err(e) => warn!(%url, error = %format!("{:#}", e), "Catalog source failed"),
            }
        }

        if let Some(mut snapshot) = cached {
            warn!(fetched_at = %snapshot.fetched_at, "All catalog sources failed, using expired cache");
            snapshot.origin = CatalogOrigin::StaleCache;
            return snapshot;
        }

        warn!("All catalog sources failed and no cache exists, using embedded catalog");
        embedded_catalog()
    }

    async fn fetch_remote(&self, url: &str) -> Result<CatalogSnapshot> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .context("Request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }

        let body = response.text().await.context("Failed to read body")?;
        parse_catalog(&body)
    }

    /// Persist `snapshot` with its `fetched_at` as the cache timestamp
    pub async fn save_cache(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let _guard = self.cache_lock.lock().await;

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .context("Failed to create cache directory")?;

        let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize catalog")?;
        write_atomic(&self.cache_path(), json.as_bytes()).await?;
        write_atomic(
            &self.timestamp_path(),
            snapshot.fetched_at.timestamp_millis().to_string().as_bytes(),
        )
        .await?;

        debug!(path = %self.cache_path().display(), "Saved catalog to cache");
        Ok(())
    }

    async fn load_cache(&self) -> Option<CatalogSnapshot> {
        let body = tokio::fs::read_to_string(self.cache_path()).await.ok()?;
        let mut snapshot = match parse_catalog(&body) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Ignoring unreadable catalog cache");
                return None;
            }
        };

        // A missing or corrupt marker makes the cache count as expired
        snapshot.fetched_at = tokio::fs::read_to_string(self.timestamp_path())
            .await
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::UNIX_EPOCH);
        snapshot.origin = CatalogOrigin::Cache;
        Some(snapshot)
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Parse a catalog document and drop entries that break snapshot invariants
pub fn parse_catalog(body: &str) -> Result<CatalogSnapshot> {
    let mut snapshot: CatalogSnapshot =
        serde_json::from_str(body).context("Malformed catalog JSON")?;
    snapshot.entries = sanitize_entries(std::mem::take(&mut snapshot.entries));
    Ok(snapshot)
}

fn sanitize_entries(entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let mut seen_filenames = HashSet::new();
    let mut kept = Vec::with_capacity(entries.len());

    for mut entry in entries {
        if entry.id.trim().is_empty() {
            warn!(filename = %entry.filename, "Dropping catalog entry without id");
            continue;
        }
        if !is_plain_filename(&entry.filename) {
            warn!(id = %entry.id, filename = %entry.filename, "Dropping catalog entry with unsafe filename");
            continue;
        }

        entry.sha256 = match entry.sha256.take().map(|s| s.trim().to_ascii_lowercase()) {
            Some(digest) if digest.is_empty() => None,
            Some(digest) if is_valid_sha256(&digest) => Some(digest),
            Some(digest) => {
                warn!(id = %entry.id, %digest, "Dropping catalog entry with malformed sha256");
                continue;
            }
            None => None,
        };

        if !seen_filenames.insert(entry.filename.clone()) {
            warn!(id = %entry.id, filename = %entry.filename, "Dropping catalog entry with duplicate filename");
            continue;
        }
        kept.push(entry);
    }
    kept
}

/// A bare file name that cannot escape the models directory
pub(crate) fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.ends_with(".tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "d4f8c8b2a1e3f5c7d9b0e2f4a6c8e0d2b4f6a8c0e2d4f6b8a0c2e4f6a8c0e2d4";

    fn doc(models: &str) -> String {
        format!(r#"{{"version":"2.0","updated":"2024-05-01T00:00:00Z","models":[{}]}}"#, models)
    }

    fn model(id: &str, filename: &str, sha: &str) -> String {
        format!(
            r#"{{"id":"{id}","name":"{id}","description":"d","version":"1","size_bytes":10,
                "size_display":"10 B","filename":"{filename}","parameters":"1B","quantization":"Q4_K_M",
                "context_length":2048,"use_case":"chat","tags":["mobile"],"license":"MIT","author":"a",
                "sha256":"{sha}","download_urls":[{{"name":"cdn","url":"https://cdn/x","priority":1,
                "location":"GLOBAL","type":"CDN"}}],"recommended_ram_gb":2,"performance_score":7.5,
                "quality_score":6.0}}"#
        )
    }

    #[test]
    fn test_parse_wire_format() {
        let snapshot = parse_catalog(&doc(&model("phi2", "phi-2.q4_k_m.gguf", SHA))).unwrap();
        assert_eq!(snapshot.version, "2.0");
        assert_eq!(snapshot.updated_at, "2024-05-01T00:00:00Z");
        let entry = snapshot.find("phi2").unwrap();
        assert_eq!(entry.mirrors.len(), 1);
        assert_eq!(entry.sha256.as_deref(), Some(SHA));
        assert_eq!(entry.recommended_ram_gb, 2);
        assert!(entry.has_tag("MOBILE"));
    }

    #[test]
    fn test_parse_normalizes_digest() {
        let upper = SHA.to_uppercase();
        let snapshot = parse_catalog(&doc(&[
            model("a", "a.gguf", &upper),
            model("b", "b.gguf", ""),
        ]
        .join(",")))
        .unwrap();
        assert_eq!(snapshot.find("a").unwrap().sha256.as_deref(), Some(SHA));
        assert_eq!(snapshot.find("b").unwrap().sha256, None);
    }

    #[test]
    fn test_parse_drops_invalid_entries() {
        let snapshot = parse_catalog(&doc(&[
            model("ok", "ok.gguf", SHA),
            model("dup", "ok.gguf", SHA),
            model("badsha", "bad.gguf", "not-a-digest"),
            model("escape", "../etc/passwd", SHA),
        ]
        .join(",")))
        .unwrap();
        let ids: Vec<_> = snapshot.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_catalog("<html>not json</html>").is_err());
        assert!(parse_catalog(r#"{"version":"1"}"#).is_err());
    }

    #[test]
    fn test_snapshot_roundtrips_through_wire_format() {
        let snapshot = parse_catalog(&doc(&model("phi2", "phi-2.gguf", SHA))).unwrap();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("models").is_some());
        assert!(json.get("fetched_at").is_none());
        assert_eq!(json["models"][0]["download_urls"][0]["type"], "CDN");

        let again = parse_catalog(&json.to_string()).unwrap();
        assert_eq!(again.entries, snapshot.entries);
    }
}
