//! Content addressing for model artifacts.
//!
//! Artifacts are identified by the SHA-256 of their bytes. Files are hashed
//! through a read-only memory map so large models are not copied into the heap.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hash recorded as `old_hash` when no artifact was active before a swap.
pub const INITIAL_HASH: &str = "initial";

/// Lowercase hex SHA-256 digest of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactDigest(String);

impl ArtifactDigest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Hash the file at `path`.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            // Zero-length files cannot be mapped on every platform.
            return Ok(Self::of_bytes(&[]));
        }
        // SAFETY: the mapping is read-only and dropped before returning. The
        // update service is the only writer of managed artifacts and replaces
        // them by rename, so the mapped inode is never truncated underneath us.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::of_bytes(&mmap))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a hex digest supplied by configuration (case-insensitive).
    pub fn matches_hex(&self, expected: &str) -> bool {
        self.0.eq_ignore_ascii_case(expected.trim())
    }
}

impl fmt::Display for ArtifactDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of the artifact at `path`, or `None` when no file exists there.
pub fn current_digest(path: &Path) -> io::Result<Option<ArtifactDigest>> {
    match ArtifactDigest::of_file(path) {
        Ok(digest) => Ok(Some(digest)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Observed state of the active artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    /// `None` when the file changed since it was last hashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<ArtifactDigest>,
}

impl ArtifactInfo {
    /// Inspect and hash the artifact at `path`. Returns `Ok(None)` if it
    /// does not exist.
    pub fn inspect(path: &Path) -> io::Result<Option<Self>> {
        let mut info = match Self::stat(path, None)? {
            Some(info) => info,
            None => return Ok(None),
        };
        info.sha256 = Some(ArtifactDigest::of_file(path)?);
        Ok(Some(info))
    }

    /// Metadata only. The digest of `known` is carried over while size and
    /// modification time still match it.
    pub fn stat(path: &Path, known: Option<&ArtifactInfo>) -> io::Result<Option<Self>> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let size_bytes = metadata.len();
        let modified = DateTime::<Utc>::from(metadata.modified()?);
        let sha256 = known
            .filter(|k| k.path == path && k.size_bytes == size_bytes && k.modified == modified)
            .and_then(|k| k.sha256.clone());
        Ok(Some(Self {
            path: path.to_path_buf(),
            size_bytes,
            modified,
            sha256,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let a = ArtifactDigest::of_bytes(b"model-v1");
        let b = ArtifactDigest::of_bytes(b"model-v1");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_digest_differs_for_different_content() {
        let a = ArtifactDigest::of_bytes(b"model-v1");
        let b = ArtifactDigest::of_bytes(b"model-v2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_digest_matches_bytes_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, b"weights").unwrap();
        assert_eq!(ArtifactDigest::of_file(&path).unwrap(), ArtifactDigest::of_bytes(b"weights"));
    }

    #[test]
    fn test_empty_file_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(ArtifactDigest::of_file(&path).unwrap(), ArtifactDigest::of_bytes(b""));
    }

    #[test]
    fn test_current_digest_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(current_digest(&dir.path().join("absent.bin")).unwrap().is_none());
    }

    #[test]
    fn test_matches_hex_ignores_case() {
        let digest = ArtifactDigest::of_bytes(b"abc");
        let upper = digest.as_str().to_ascii_uppercase();
        assert!(digest.matches_hex(&upper));
        assert!(!digest.matches_hex(&"0".repeat(64)));
    }

    #[test]
    fn test_inspect_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, vec![7u8; 2048]).unwrap();
        let info = ArtifactInfo::inspect(&path).unwrap().unwrap();
        assert_eq!(info.size_bytes, 2048);
        assert_eq!(info.sha256, Some(ArtifactDigest::of_bytes(&[7u8; 2048])));
        assert!(ArtifactInfo::inspect(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn test_stat_reuses_known_digest_until_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, vec![7u8; 2048]).unwrap();
        let known = ArtifactInfo::inspect(&path).unwrap().unwrap();

        let cached = ArtifactInfo::stat(&path, Some(&known)).unwrap().unwrap();
        assert_eq!(cached.sha256, known.sha256);
        assert!(ArtifactInfo::stat(&path, None).unwrap().unwrap().sha256.is_none());

        std::fs::write(&path, vec![8u8; 4096]).unwrap();
        let changed = ArtifactInfo::stat(&path, Some(&known)).unwrap().unwrap();
        assert_eq!(changed.size_bytes, 4096);
        assert!(changed.sha256.is_none());
    }
}
