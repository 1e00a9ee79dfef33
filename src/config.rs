//! Configuration management for ModelDepot
//!
//! Persisted as TOML at `~/.modeldepot/config.toml`. Every section has defaults,
//! so a partial file (or none at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::MirrorLocation;

/// Default remote catalog sources, tried in order
pub const DEFAULT_CATALOG_SOURCES: &[&str] = &[
    "https://cdn.modeldepot.dev/models/catalog.json",
    "https://modeldepot-models.s3.amazonaws.com/catalog.json",
    "https://raw.githubusercontent.com/modeldepot/model-catalog/main/catalog.json",
];

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Catalog retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// Remote catalog URLs in priority order
    pub sources: Vec<String>,
    /// How long a cached catalog is served without touching the network
    pub cache_ttl_hours: u64,
    /// Per-source request timeout
    pub request_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            sources: DEFAULT_CATALOG_SOURCES.iter().map(|s| s.to_string()).collect(),
            cache_ttl_hours: 24,
            request_timeout_secs: 10,
        }
    }
}

impl CatalogConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Model transfer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Read buffer size per chunk
    pub chunk_size: usize,
    /// Minimum time between progress reports
    pub progress_interval_ms: u64,
    /// Report early once this many bytes arrived since the last report
    pub progress_bytes: u64,
    /// Mirrors tried per download request (first-ranked plus fallbacks)
    pub max_mirror_attempts: usize,
    pub preferred_location: MirrorLocation,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024,
            progress_interval_ms: 1000,
            progress_bytes: 5 * 1024 * 1024,
            max_mirror_attempts: 2,
            preferred_location: MirrorLocation::Us,
            connect_timeout_secs: 15,
            user_agent: format!("modeldepot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DownloadConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// On-disk locations (defaults under `~/.modeldepot`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// ModelDepot configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Version of config schema
    #[serde(default = "current_version")]
    pub version: u32,
}

fn current_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            download: DownloadConfig::default(),
            storage: StorageConfig::default(),
            version: current_version(),
        }
    }
}

impl Config {
    /// Get the config file path (~/.modeldepot/config.toml)
    pub fn path() -> Result<PathBuf> {
        Ok(depot_dir()?.join("config.toml"))
    }

    /// Check if config exists (i.e., not first run)
    pub fn exists() -> bool {
        Self::path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Load config from disk, or return None if it doesn't exist
    pub fn load() -> Result<Option<Self>> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .context("Failed to read config file")?;
        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;
        Ok(Some(config))
    }

    pub fn load_or_default() -> Result<Self> {
        Ok(Self::load()?.unwrap_or_default())
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Root both storage locations under `data_dir`
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        self.storage.models_dir = Some(data_dir.join("models"));
        self.storage.cache_dir = Some(data_dir.join("cache"));
        self
    }

    /// Directory holding finalized model files
    pub fn models_dir(&self) -> Result<PathBuf> {
        match &self.storage.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(depot_dir()?.join("models")),
        }
    }

    /// Directory holding the catalog cache
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.storage.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(depot_dir()?.join("cache")),
        }
    }
}

/// Get the base directory path (~/.modeldepot)
pub fn depot_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".modeldepot"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.catalog.cache_ttl_hours, 24);
        assert_eq!(config.download.chunk_size, 8192);
        assert_eq!(config.download.max_mirror_attempts, 2);
        assert_eq!(config.download.preferred_location, MirrorLocation::Us);
        assert_eq!(config.version, 1);
        assert!(!config.catalog.sources.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default().with_data_dir("/tmp/depot");
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
        assert_eq!(parsed.models_dir().unwrap(), PathBuf::from("/tmp/depot/models"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [download]
            max_mirror_attempts = 3
            preferred_location = "EU"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.download.max_mirror_attempts, 3);
        assert_eq!(parsed.download.preferred_location, MirrorLocation::Eu);
        assert_eq!(parsed.download.chunk_size, 8192);
        assert_eq!(parsed.catalog, CatalogConfig::default());
    }
}
