use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Region a mirror is hosted in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum MirrorLocation {
    Us,
    Eu,
    Asia,
    #[default]
    Global,
}

impl MirrorLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Eu => "EU",
            Self::Asia => "ASIA",
            Self::Global => "GLOBAL",
        }
    }
}

impl From<String> for MirrorLocation {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "US" => Self::Us,
            "EU" => Self::Eu,
            "ASIA" => Self::Asia,
            _ => Self::Global,
        }
    }
}

impl std::str::FromStr for MirrorLocation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

/// Transport class of a mirror
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum MirrorKind {
    Cdn,
    #[default]
    Direct,
    /// Reserved; never selected for download
    Torrent,
}

impl From<String> for MirrorKind {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "CDN" => Self::Cdn,
            "TORRENT" => Self::Torrent,
            _ => Self::Direct,
        }
    }
}

/// One concrete download location for a catalog entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadMirror {
    pub name: String,
    pub url: String,
    /// 1 = most preferred
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub location: MirrorLocation,
    #[serde(rename = "type", default)]
    pub kind: MirrorKind,
}

fn default_priority() -> u32 {
    u32::MAX
}

/// A downloadable model as advertised by the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub size_display: String,
    /// On-disk name inside the models directory
    pub filename: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub quantization: String,
    #[serde(default)]
    pub context_length: u32,
    #[serde(default)]
    pub use_case: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub author: String,
    /// Lowercase hex SHA-256; `None` skips verification
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(rename = "download_urls", default)]
    pub mirrors: Vec<DownloadMirror>,
    #[serde(default)]
    pub recommended_ram_gb: u32,
    #[serde(default)]
    pub performance_score: f32,
    #[serde(default)]
    pub quality_score: f32,
}

impl CatalogEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Where a snapshot came from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "url")]
pub enum CatalogOrigin {
    /// Cache within its TTL
    Cache,
    /// Freshly fetched from this URL
    Remote(String),
    /// Expired cache used because every remote failed
    StaleCache,
    /// Built-in baseline
    #[default]
    Embedded,
}

/// Immutable, timestamped catalog
///
/// Serializes to the catalog wire format (`version`, `updated`, `models`); the
/// bookkeeping fields are not part of the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogSnapshot {
    pub version: String,
    #[serde(rename = "updated", default)]
    pub updated_at: String,
    #[serde(rename = "models")]
    pub entries: Vec<CatalogEntry>,
    #[serde(skip, default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
    #[serde(skip)]
    pub origin: CatalogOrigin,
}

impl CatalogSnapshot {
    pub fn find(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    /// Entries carrying `tag` (case-insensitive)
    pub fn with_tag(&self, tag: &str) -> Vec<&CatalogEntry> {
        self.entries.iter().filter(|e| e.has_tag(tag)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Downloads
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of one model download
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Progress of a single in-flight transfer, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_downloaded: u64,
    /// `None` when the server omits Content-Length
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: u64,
}

/// Observable state of a model download
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadState {
    pub model_id: String,
    pub status: DownloadStatus,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    /// 0-100; 0 while the total is unknown
    pub percentage: u8,
    pub speed_bytes_per_sec: u64,
    pub eta_secs: Option<u64>,
    pub current_mirror: Option<String>,
    pub error: Option<String>,
}

impl DownloadState {
    pub fn pending(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            status: DownloadStatus::Pending,
            bytes_downloaded: 0,
            total_bytes: None,
            percentage: 0,
            speed_bytes_per_sec: 0,
            eta_secs: None,
            current_mirror: None,
            error: None,
        }
    }

    /// Fold an engine progress report into this state
    pub fn apply_progress(&mut self, progress: TransferProgress) {
        self.bytes_downloaded = progress.bytes_downloaded;
        self.total_bytes = progress.total_bytes;
        self.speed_bytes_per_sec = progress.speed_bytes_per_sec;
        self.percentage = percentage_of(progress.bytes_downloaded, progress.total_bytes);
        self.eta_secs = match progress.total_bytes {
            Some(total) if progress.speed_bytes_per_sec > 0 && total > progress.bytes_downloaded => {
                Some((total - progress.bytes_downloaded) / progress.speed_bytes_per_sec)
            }
            _ => None,
        };
    }
}

pub fn percentage_of(bytes: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => ((bytes.min(total) as u128 * 100) / total as u128) as u8,
        _ => 0,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local store
// ─────────────────────────────────────────────────────────────────────────────

/// A model file found in the models directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalModel {
    /// File stem
    pub id: String,
    pub display_name: String,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub date_added: DateTime<Utc>,
    pub is_from_catalog: bool,
    pub is_active: bool,
}

impl LocalModel {
    pub fn filename(&self) -> Option<&str> {
        self.file_path.file_name().and_then(|n| n.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_unknown_total_is_zero() {
        assert_eq!(percentage_of(500, None), 0);
        assert_eq!(percentage_of(500, Some(0)), 0);
        assert_eq!(percentage_of(50, Some(200)), 25);
        assert_eq!(percentage_of(300, Some(200)), 100);
    }

    #[test]
    fn test_apply_progress_derives_eta() {
        let mut state = DownloadState::pending("m");
        state.apply_progress(TransferProgress {
            bytes_downloaded: 400,
            total_bytes: Some(1000),
            speed_bytes_per_sec: 100,
        });
        assert_eq!(state.percentage, 40);
        assert_eq!(state.eta_secs, Some(6));

        state.apply_progress(TransferProgress {
            bytes_downloaded: 400,
            total_bytes: None,
            speed_bytes_per_sec: 100,
        });
        assert_eq!(state.eta_secs, None);
        assert_eq!(state.percentage, 0);
    }

    #[test]
    fn test_status_terminal() {
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Cancelled.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(DownloadStatus::Verifying.is_active());
        assert!(DownloadStatus::Pending.is_active());
    }

    #[test]
    fn test_mirror_wire_names() {
        let json = r#"{"name":"m","url":"https://x/y","priority":2,"location":"eu","type":"CDN"}"#;
        let mirror: DownloadMirror = serde_json::from_str(json).unwrap();
        assert_eq!(mirror.location, MirrorLocation::Eu);
        assert_eq!(mirror.kind, MirrorKind::Cdn);

        let out = serde_json::to_value(&mirror).unwrap();
        assert_eq!(out["location"], "EU");
        assert_eq!(out["type"], "CDN");
    }

    #[test]
    fn test_unknown_location_falls_back_to_global() {
        let json = r#"{"name":"m","url":"u","priority":1,"location":"MARS","type":"FTP"}"#;
        let mirror: DownloadMirror = serde_json::from_str(json).unwrap();
        assert_eq!(mirror.location, MirrorLocation::Global);
        assert_eq!(mirror.kind, MirrorKind::Direct);
    }
}
