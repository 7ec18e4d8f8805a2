//! Crash-safe artifact replacement.
//!
//! The new content is staged in a temp file next to the target, flushed, and
//! renamed into place. Readers see either the old or the new artifact.

use std::fs::File;
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Swap source not found: {0}")]
    SourceMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Replace `target` with a copy of `source`.
///
/// The target's permissions are carried over when it already exists.
pub fn replace_atomically(source: &Path, target: &Path) -> Result<(), SwapError> {
    let mut input = match File::open(source) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SwapError::SourceMissing(source.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    io::copy(&mut input, staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    if let Ok(existing) = std::fs::metadata(target) {
        std::fs::set_permissions(staged.path(), existing.permissions())?;
    }

    staged.persist(target).map_err(|e| SwapError::Io(e.error))?;
    Ok(())
}
