//! Advisory lock file guarding the artifact paths against a second updater.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Held for the lifetime of an update service. Removed on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Create `path` exclusively. Fails with `AlreadyExists` when another
    /// updater holds it.
    ///
    /// A lock left behind by a process that no longer exists is removed and
    /// taken over. Liveness is only checked on Linux; elsewhere any existing
    /// lock counts as held.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        match Self::create(path) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let pid = match Self::holder(path) {
                    Some(pid) if !process_alive(pid) => pid,
                    _ => return Err(e),
                };
                warn!(lock = %path.display(), pid, "removing stale updater lock");
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                Self::create(path)
            }
            other => other,
        }
    }

    /// Process id recorded in the lock at `path`.
    pub fn holder(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(lock = %path.display(), "updater lock acquired");
        Ok(Self { path: path.to_path_buf() })
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    pid == std::process::id() || Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to release updater lock");
        }
    }
}
