//! On-disk layout of a backup destination.
//!
//! ```text
//! <destination>/
//!   current -> <latest snapshot>
//!   <YYYY-MM-DD__HH-MM-SS>/
//!   .inprogress/
//!     .partial/
//! ```

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use super::name::SnapshotName;

/// Staging entry. Not a valid snapshot name, so never mistaken for one.
pub const STAGING_NAME: &str = ".inprogress";

/// Partial-transfer residue, nested under the staging entry.
pub const PARTIAL_DIR_NAME: &str = ".partial";

/// Latest pointer.
pub const POINTER_NAME: &str = "current";

/// Temporary name the new pointer is created under before it is renamed
/// over [`POINTER_NAME`].
pub const POINTER_TMP_NAME: &str = ".current.tmp";

/// Advisory single-writer lock.
pub const LOCK_NAME: &str = ".rewind.lock";

/// What the latest pointer currently resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerState {
    /// No pointer yet: first backup into this destination.
    Absent,
    /// Pointer targets an existing snapshot directory.
    Snapshot(SnapshotName),
    /// Pointer exists but its target is missing or is not a snapshot.
    Dangling(PathBuf),
    /// Something that is not a symlink occupies the pointer name.
    NotSymlink,
}

/// A backup destination root and the fixed paths inside it.
#[derive(Debug, Clone)]
pub struct DestinationRoot {
    root: PathBuf,
}

impl DestinationRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn staging_path(&self) -> PathBuf {
        self.root.join(STAGING_NAME)
    }

    pub fn partial_path(&self) -> PathBuf {
        self.staging_path().join(PARTIAL_DIR_NAME)
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.root.join(POINTER_NAME)
    }

    pub fn pointer_tmp_path(&self) -> PathBuf {
        self.root.join(POINTER_TMP_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_NAME)
    }

    pub fn snapshot_path(&self, name: &SnapshotName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Baseline link as seen from inside the staging entry. The staging
    /// entry and the pointer are siblings, so this never changes.
    pub fn baseline_link() -> PathBuf {
        Path::new("..").join(POINTER_NAME)
    }

    pub fn has_staging(&self) -> bool {
        fs::symlink_metadata(self.staging_path())
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Inspect the latest pointer without following it blindly.
    pub fn latest_pointer(&self) -> io::Result<PointerState> {
        let pointer = self.pointer_path();
        let meta = match fs::symlink_metadata(&pointer) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PointerState::Absent),
            Err(e) => return Err(e),
        };
        if !meta.file_type().is_symlink() {
            return Ok(PointerState::NotSymlink);
        }

        let target = fs::read_link(&pointer)?;
        let name = match single_component(&target).and_then(SnapshotName::parse) {
            Some(name) => name,
            None => return Ok(PointerState::Dangling(target)),
        };
        match fs::metadata(self.snapshot_path(&name)) {
            Ok(m) if m.is_dir() => Ok(PointerState::Snapshot(name)),
            Ok(_) => Ok(PointerState::Dangling(target)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PointerState::Dangling(target)),
            Err(e) => Err(e),
        }
    }

    /// The snapshot new transfers link unchanged files against, if any.
    pub fn baseline(&self) -> io::Result<Option<SnapshotName>> {
        match self.latest_pointer()? {
            PointerState::Snapshot(name) => Ok(Some(name)),
            PointerState::Absent => Ok(None),
            PointerState::Dangling(target) => {
                warn!(target = %target.display(), "Latest pointer is dangling, running without a baseline");
                Ok(None)
            }
            PointerState::NotSymlink => {
                warn!(
                    path = %self.pointer_path().display(),
                    "Latest pointer is not a symlink, running without a baseline"
                );
                Ok(None)
            }
        }
    }

    /// All committed snapshots, oldest first.
    pub fn snapshots(&self) -> io::Result<Vec<SnapshotName>> {
        let mut names: Vec<SnapshotName> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().and_then(SnapshotName::parse))
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Pointer targets are written as a bare relative name; anything else is
/// not ours.
fn single_component(target: &Path) -> Option<&str> {
    let mut components = target.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name.to_str(),
        _ => None,
    }
}
