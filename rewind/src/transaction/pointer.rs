//! Latest pointer update.
//!
//! The new symlink is created under a temporary name and renamed over the
//! old one, so `current` is replaced in a single step and never missing.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use tracing::debug;

use crate::snapshot::{DestinationRoot, SnapshotName};
use crate::utils::errors::{BackupError, Result};

pub fn swap(root: &DestinationRoot, snapshot: &SnapshotName) -> Result<()> {
    let pointer = root.pointer_path();
    let pointer_error = |source: io::Error| BackupError::PointerUpdate {
        snapshot: snapshot.to_string(),
        source,
    };

    // Only ever replace a symlink; a real directory under this name is not ours.
    match fs::symlink_metadata(&pointer) {
        Ok(meta) if !meta.file_type().is_symlink() => {
            return Err(BackupError::PointerNotSymlink {
                snapshot: snapshot.to_string(),
                path: pointer,
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(pointer_error(e)),
    }

    let tmp = root.pointer_tmp_path();
    match fs::symlink_metadata(&tmp) {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!(path = %tmp.display(), "Removing leftover pointer from an interrupted swap");
            fs::remove_file(&tmp).map_err(pointer_error)?;
        }
        Ok(_) => {
            return Err(pointer_error(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a symlink", tmp.display()),
            )));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(pointer_error(e)),
    }

    // Relative target keeps the destination root relocatable.
    symlink(snapshot.as_str(), &tmp).map_err(pointer_error)?;
    if let Err(e) = fs::rename(&tmp, &pointer) {
        let _ = fs::remove_file(&tmp);
        return Err(pointer_error(e));
    }

    debug!(pointer = %pointer.display(), snapshot = %snapshot, "Latest pointer updated");
    Ok(())
}
