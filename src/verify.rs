//! Content integrity checks for downloaded model files

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HASH_BUFFER: usize = 8192;

/// Streaming SHA-256 over a file, read in fixed-size chunks
pub fn compute_sha256(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// True for a 64-character hex string
pub fn is_valid_sha256(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Checks files against catalog digests
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Compare the file's digest to `expected`, case-insensitively.
    ///
    /// A missing or empty digest passes: entries published without a hash are
    /// trusted on first use.
    pub async fn verify(&self, path: &Path, expected: Option<&str>) -> io::Result<bool> {
        let expected = match expected.map(str::trim) {
            Some(digest) if !digest.is_empty() => digest.to_string(),
            _ => {
                info!(path = %path.display(), "No checksum published, skipping verification");
                return Ok(true);
            }
        };

        let owned: PathBuf = path.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || compute_sha256(&owned))
            .await
            .map_err(io::Error::other)??;

        let matches = actual.eq_ignore_ascii_case(&expected);
        debug!(path = %path.display(), %actual, %expected, matches, "Checksum computed");
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // sha256("hello world")
    const HELLO: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_sha256() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(compute_sha256(&path).unwrap(), HELLO);
    }

    #[test]
    fn test_is_valid_sha256() {
        assert!(is_valid_sha256(HELLO));
        assert!(is_valid_sha256(&HELLO.to_uppercase()));
        assert!(!is_valid_sha256("abc"));
        assert!(!is_valid_sha256(&HELLO.replace('b', "z")));
    }

    #[tokio::test]
    async fn test_verify_matches_case_insensitive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let verifier = IntegrityVerifier::new();
        assert!(verifier.verify(&path, Some(HELLO)).await.unwrap());
        assert!(verifier.verify(&path, Some(&HELLO.to_uppercase())).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_detects_single_byte_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello worle").unwrap();

        let verifier = IntegrityVerifier::new();
        assert!(!verifier.verify(&path, Some(HELLO)).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_without_digest_passes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"anything").unwrap();

        let verifier = IntegrityVerifier::new();
        assert!(verifier.verify(&path, None).await.unwrap());
        assert!(verifier.verify(&path, Some("  ")).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let verifier = IntegrityVerifier::new();
        assert!(verifier
            .verify(&dir.path().join("nope"), Some(HELLO))
            .await
            .is_err());
    }
}
