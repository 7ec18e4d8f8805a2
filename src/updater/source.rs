//! Where candidate artifacts come from.
//!
//! A source delivers one candidate file into the staging directory. The
//! orchestrator owns the file from then on and deletes it after the cycle.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("No candidate staged at {0}")]
    NothingStaged(PathBuf),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A fetched candidate sitting in the staging directory.
#[derive(Debug)]
pub struct Candidate {
    pub path: PathBuf,
    pub origin: String,
}

impl Candidate {
    /// Delete the staged file. Missing files are ignored.
    pub fn discard(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(candidate = %self.path.display(), "candidate discarded"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(candidate = %self.path.display(), error = %e, "failed to discard candidate"),
        }
    }
}

/// Supplies candidate artifacts.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Short label recorded with every update.
    fn name(&self) -> &str;

    /// Place a candidate in `staging_dir`.
    async fn fetch(&self, staging_dir: &Path) -> Result<Candidate, FetchError>;
}

fn staged_name(extension: &str) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("candidate_{}_{:08x}.{}", stamp, rand::random::<u32>(), extension)
}

/// Produces random payloads. Stand-in for a real model registry.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    payload_bytes: usize,
}

impl SyntheticSource {
    pub fn new(payload_bytes: usize) -> Self {
        Self { payload_bytes }
    }
}

#[async_trait]
impl ArtifactSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn fetch(&self, staging_dir: &Path) -> Result<Candidate, FetchError> {
        let payload = {
            let mut bytes = vec![0u8; self.payload_bytes];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        };

        tokio::fs::create_dir_all(staging_dir).await?;
        let path = staging_dir.join(staged_name("bin"));
        tokio::fs::write(&path, &payload).await?;

        debug!(candidate = %path.display(), bytes = payload.len(), "synthetic candidate generated");
        Ok(Candidate {
            path,
            origin: self.name().to_string(),
        })
    }
}

/// Picks up an artifact dropped into an incoming directory by an operator
/// or an external sync job.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    incoming: PathBuf,
}

impl DirectorySource {
    /// `incoming` is the full path of the file to watch for.
    pub fn new(incoming: impl Into<PathBuf>) -> Self {
        Self { incoming: incoming.into() }
    }
}

#[async_trait]
impl ArtifactSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn fetch(&self, staging_dir: &Path) -> Result<Candidate, FetchError> {
        if !tokio::fs::try_exists(&self.incoming).await? {
            return Err(FetchError::NothingStaged(self.incoming.clone()));
        }

        tokio::fs::create_dir_all(staging_dir).await?;
        let extension = self
            .incoming
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let path = staging_dir.join(staged_name(extension));

        // Rename fails across filesystems; fall back to copy + remove.
        if tokio::fs::rename(&self.incoming, &path).await.is_err() {
            tokio::fs::copy(&self.incoming, &path).await?;
            tokio::fs::remove_file(&self.incoming).await?;
        }

        info!(from = %self.incoming.display(), candidate = %path.display(), "staged candidate picked up");
        Ok(Candidate {
            path,
            origin: self.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_source_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let source = SyntheticSource::new(4096);
        let candidate = source.fetch(&dir.path().join("staging")).await.unwrap();
        assert_eq!(std::fs::metadata(&candidate.path).unwrap().len(), 4096);
        assert_eq!(candidate.origin, "synthetic");

        let path = candidate.path.clone();
        candidate.discard();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_synthetic_payloads_differ() {
        let dir = tempfile::tempdir().unwrap();
        let source = SyntheticSource::new(256);
        let a = source.fetch(dir.path()).await.unwrap();
        let b = source.fetch(dir.path()).await.unwrap();
        assert_ne!(std::fs::read(&a.path).unwrap(), std::fs::read(&b.path).unwrap());
    }

    #[tokio::test]
    async fn test_directory_source_nothing_staged() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path().join("incoming").join("model.pkl"));
        let result = source.fetch(&dir.path().join("staging")).await;
        assert!(matches!(result, Err(FetchError::NothingStaged(_))));
    }

    #[tokio::test]
    async fn test_directory_source_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let incoming = dir.path().join("model.pkl");
        std::fs::write(&incoming, b"fresh weights").unwrap();

        let source = DirectorySource::new(&incoming);
        let candidate = source.fetch(&dir.path().join("staging")).await.unwrap();

        assert!(!incoming.exists());
        assert_eq!(std::fs::read(&candidate.path).unwrap(), b"fresh weights");
        assert!(candidate.path.extension().map_or(false, |e| e == "pkl"));
    }
}
