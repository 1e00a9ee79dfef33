//! Mirror ordering policy

use crate::types::{CatalogEntry, DownloadMirror, MirrorKind, MirrorLocation};

/// Orders a catalog entry's mirrors.
///
/// Key: priority ascending, then mirrors in the preferred location, then CDNs.
/// Torrent mirrors are never candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorSelector {
    preferred_location: MirrorLocation,
}

impl MirrorSelector {
    pub fn new(preferred_location: MirrorLocation) -> Self {
        Self { preferred_location }
    }

    pub fn preferred_location(&self) -> MirrorLocation {
        self.preferred_location
    }

    /// All usable mirrors, best first
    pub fn rank(&self, entry: &CatalogEntry) -> Vec<DownloadMirror> {
        let mut mirrors: Vec<DownloadMirror> = entry
            .mirrors
            .iter()
            .filter(|m| m.kind != MirrorKind::Torrent)
            .cloned()
            .collect();

        mirrors.sort_by_key(|m| {
            (
                m.priority,
                u8::from(m.location != self.preferred_location),
                u8::from(m.kind != MirrorKind::Cdn),
            )
        });
        mirrors
    }

    /// Best mirror, or `None` when nothing usable is listed
    pub fn select(&self, entry: &CatalogEntry) -> Option<DownloadMirror> {
        self.rank(entry).into_iter().next()
    }
}

impl Default for MirrorSelector {
    fn default() -> Self {
        Self::new(MirrorLocation::Us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(name: &str, priority: u32, location: MirrorLocation, kind: MirrorKind) -> DownloadMirror {
        DownloadMirror {
            name: name.to_string(),
            url: format!("https://{}.example/model.gguf", name),
            priority,
            location,
            kind,
        }
    }

    fn entry(mirrors: Vec<DownloadMirror>) -> CatalogEntry {
        CatalogEntry {
            id: "m".to_string(),
            name: "M".to_string(),
            description: String::new(),
            version: "1".to_string(),
            size_bytes: 0,
            size_display: String::new(),
            filename: "m.gguf".to_string(),
            parameters: String::new(),
            quantization: String::new(),
            context_length: 0,
            use_case: String::new(),
            tags: Default::default(),
            license: String::new(),
            author: String::new(),
            sha256: None,
            mirrors,
            recommended_ram_gb: 0,
            performance_score: 0.0,
            quality_score: 0.0,
        }
    }

    #[test]
    fn test_priority_beats_location() {
        let e = entry(vec![
            mirror("eu", 2, MirrorLocation::Eu, MirrorKind::Cdn),
            mirror("us", 1, MirrorLocation::Us, MirrorKind::Cdn),
        ]);
        let selector = MirrorSelector::new(MirrorLocation::Us);
        assert_eq!(selector.select(&e).unwrap().name, "us");

        // Still priority 1 even when the preferred region only has priority 2
        let e = entry(vec![
            mirror("eu", 2, MirrorLocation::Eu, MirrorKind::Cdn),
            mirror("us", 1, MirrorLocation::Us, MirrorKind::Cdn),
        ]);
        let selector = MirrorSelector::new(MirrorLocation::Eu);
        assert_eq!(selector.select(&e).unwrap().name, "us");
    }

    #[test]
    fn test_location_then_cdn_break_ties() {
        let e = entry(vec![
            mirror("global-direct", 1, MirrorLocation::Global, MirrorKind::Direct),
            mirror("asia-direct", 1, MirrorLocation::Asia, MirrorKind::Direct),
            mirror("global-cdn", 1, MirrorLocation::Global, MirrorKind::Cdn),
        ]);
        let ranked: Vec<String> = MirrorSelector::new(MirrorLocation::Asia)
            .rank(&e)
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(ranked, vec!["asia-direct", "global-cdn", "global-direct"]);
    }

    #[test]
    fn test_torrent_excluded() {
        let e = entry(vec![
            mirror("swarm", 1, MirrorLocation::Us, MirrorKind::Torrent),
            mirror("http", 5, MirrorLocation::Eu, MirrorKind::Direct),
        ]);
        let selector = MirrorSelector::new(MirrorLocation::Us);
        assert_eq!(selector.select(&e).unwrap().name, "http");
        assert_eq!(selector.rank(&e).len(), 1);
    }

    #[test]
    fn test_no_mirror_available() {
        let selector = MirrorSelector::default();
        assert!(selector.select(&entry(vec![])).is_none());

        let only_torrent = entry(vec![mirror("swarm", 1, MirrorLocation::Us, MirrorKind::Torrent)]);
        assert!(selector.select(&only_torrent).is_none());
    }
}
