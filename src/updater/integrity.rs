//! Candidate artifact gate.
//!
//! The checks are deliberately shallow: existence, size, and an optional
//! pinned digest. Nothing here parses model internals.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use super::artifact::ArtifactDigest;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Candidate not found: {0}")]
    NotFound(PathBuf),

    #[error("Candidate is not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Candidate too small: {size} bytes (min {min})")]
    TooSmall { size: u64, min: u64 },

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Accepts or rejects a candidate before it may become active.
pub trait ArtifactVerifier: Send + Sync {
    /// Run every check and return the candidate's digest on success.
    fn check(&self, candidate: &Path) -> Result<ArtifactDigest, IntegrityError>;

    /// Boolean form of [`check`](Self::check). Failures are logged.
    fn verify(&self, candidate: &Path) -> bool {
        match self.check(candidate) {
            Ok(_) => true,
            Err(e) => {
                warn!(candidate = %candidate.display(), error = %e, "candidate rejected");
                false
            }
        }
    }
}

/// Size and digest based integrity checker.
#[derive(Debug, Clone)]
pub struct IntegrityChecker {
    min_size: u64,
    expected_sha256: Option<String>,
}

impl IntegrityChecker {
    /// `min_size` is floored at one byte; empty artifacts are never valid.
    pub fn new(min_size: u64) -> Self {
        Self {
            min_size: min_size.max(1),
            expected_sha256: None,
        }
    }

    /// Pin the candidate to a known SHA-256 digest.
    pub fn with_expected_digest(mut self, sha256: impl Into<String>) -> Self {
        self.expected_sha256 = Some(sha256.into());
        self
    }

    pub fn min_size(&self) -> u64 {
        self.min_size
    }
}

impl ArtifactVerifier for IntegrityChecker {
    fn check(&self, candidate: &Path) -> Result<ArtifactDigest, IntegrityError> {
        let metadata = match std::fs::metadata(candidate) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(IntegrityError::NotFound(candidate.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(IntegrityError::NotAFile(candidate.to_path_buf()));
        }

        let size = metadata.len();
        if size < self.min_size {
            return Err(IntegrityError::TooSmall { size, min: self.min_size });
        }

        let digest = ArtifactDigest::of_file(candidate)?;
        if let Some(expected) = &self.expected_sha256 {
            if !digest.matches_hex(expected) {
                return Err(IntegrityError::DigestMismatch {
                    expected: expected.clone(),
                    actual: digest.to_string(),
                });
            }
        }

        Ok(digest)
    }
}
