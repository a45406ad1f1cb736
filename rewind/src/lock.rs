//! Advisory single-writer lock on a destination root.
//!
//! Exclusion comes from a kernel `flock` on `.rewind.lock`, which the kernel
//! drops when the owning process exits, so a killed run never wedges the
//! destination. The file also carries JSON metadata about the owner for
//! error messages; a file left behind by a dead run is simply reclaimed.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils::errors::{BackupError, Result};

/// Attempts before giving up on a lock file that keeps being replaced.
const ACQUIRE_ATTEMPTS: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMeta {
    pub pid: u32,
    pub host: String,
    pub started_at: String,
    pub version: String,
}

impl LockMeta {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            started_at: chrono::Local::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

enum Attempt {
    Acquired(DestinationLock),
    Held,
    /// The file was unlinked or replaced between open and lock.
    Replaced,
}

pub struct DestinationLock {
    path: PathBuf,
    meta: LockMeta,
    /// Unlocked when dropped, after `Drop` has removed the file.
    _flock: Flock<File>,
    released: bool,
}

impl fmt::Debug for DestinationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationLock")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("released", &self.released)
            .finish()
    }
}

impl DestinationLock {
    /// Acquire the lock at `path` without blocking.
    pub fn acquire(path: &Path) -> Result<Self> {
        let meta = LockMeta::current();
        for _ in 0..ACQUIRE_ATTEMPTS {
            match Self::try_lock(path, &meta)? {
                Attempt::Acquired(lock) => return Ok(lock),
                Attempt::Held => return Err(locked_error(path)),
                Attempt::Replaced => {
                    debug!(path = %path.display(), "Lock file replaced while locking, retrying");
                }
            }
        }
        Err(locked_error(path))
    }

    fn try_lock(path: &Path, meta: &LockMeta) -> Result<Attempt> {
        let file = open_lock_file(path)?;
        Self::lock_opened(path, file, meta)
    }

    fn lock_opened(path: &Path, file: File, meta: &LockMeta) -> Result<Attempt> {
        let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(file) => file,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => return Ok(Attempt::Held),
            Err((_, errno)) => return Err(io::Error::from(errno).into()),
        };

        // A releasing owner unlinks the file before unlocking it; a lock on
        // that orphaned inode excludes nobody.
        let locked = file.metadata()?;
        match fs::metadata(path) {
            Ok(current) if current.dev() == locked.dev() && current.ino() == locked.ino() => {}
            Ok(_) => return Ok(Attempt::Replaced),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Attempt::Replaced),
            Err(e) => return Err(e.into()),
        }

        if let Some(previous) = read_metadata(path) {
            warn!(
                path = %path.display(),
                pid = previous.pid,
                since = %previous.started_at,
                "Reclaiming destination lock left by an earlier run"
            );
        }

        write_metadata(&mut file, meta)?;
        debug!(path = %path.display(), pid = meta.pid, "Acquired destination lock");
        Ok(Attempt::Acquired(Self {
            path: path.to_path_buf(),
            meta: meta.clone(),
            _flock: file,
            released: false,
        }))
    }

    pub fn meta(&self) -> &LockMeta {
        &self.meta
    }

    /// Remove the lock file, then unlock.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl Drop for DestinationLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
}

fn write_metadata(file: &mut File, meta: &LockMeta) -> Result<()> {
    file.set_len(0)?;
    serde_json::to_writer(&mut *file, meta).map_err(io::Error::from)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

/// Owner metadata, if the file holds any. A run killed right after
/// creating the file leaves it empty.
fn read_metadata(path: &Path) -> Option<LockMeta> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn locked_error(path: &Path) -> BackupError {
    let held = read_metadata(path);
    BackupError::Locked {
        path: path.to_path_buf(),
        pid: held.as_ref().map(|m| m.pid).unwrap_or(0),
        host: held
            .as_ref()
            .map(|m| m.host.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        since: held
            .map(|m| m.started_at)
            .unwrap_or_else(|| "unknown".to_string()),
    }
}
