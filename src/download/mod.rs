//! Model file transfer
//!
//! The engine moves bytes for one mirror; the coordinator owns per-model state,
//! mirror fallback, verification and finalization.

mod coordinator;
mod engine;

pub use coordinator::DownloadCoordinator;
pub use engine::{finalize, DownloadEngine, StreamOutcome};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Suffix of in-progress transfer files
pub const TEMP_SUFFIX: &str = ".tmp";

/// Errors that end a transfer attempt
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("No mirror available for {0}")]
    NoMirror(String),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Connection interrupted after {bytes} bytes: {source}")]
    Interrupted {
        bytes: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Checksum mismatch for {filename}")]
    IntegrityMismatch { filename: String },

    #[error("File error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    Finalize {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not verify {}: {source}", path.display())]
    Verify {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Whether the next-ranked mirror might succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Request { .. } | Self::Status { .. } | Self::Interrupted { .. } | Self::SizeMismatch { .. }
        )
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// `<dest>.tmp` next to the final file
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TEMP_SUFFIX);
    dest.with_file_name(name)
}
