//! Error types for backup runs.
//!
//! Variants are grouped the way failures surface to the operator: usage
//! errors are raised before anything touches the destination, transfer and
//! commit errors leave the staging entry in place for the next run, and
//! pointer errors happen after the snapshot is already durable.

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncError;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Destination does not exist: {}", .0.display())]
    DestinationMissing(PathBuf),

    #[error("Sync primitive unavailable: {0}")]
    PrimitiveUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Destination is locked by pid {pid} on {host} since {since}: {}", .path.display())]
    Locked {
        path: PathBuf,
        pid: u32,
        host: String,
        since: String,
    },

    #[error("Transfer failed: {0}")]
    Transfer(#[from] SyncError),

    #[error("Commit of {} to {} failed: {source}", .staging.display(), .snapshot.display())]
    Commit {
        staging: PathBuf,
        snapshot: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {0} already exists; staging entry kept for the next run")]
    SnapshotExists(String),

    #[error("Snapshot {snapshot} committed but latest pointer update failed: {source}")]
    PointerUpdate {
        snapshot: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {snapshot} committed but {} is not a symlink; refusing to replace it", .path.display())]
    PointerNotSymlink { snapshot: String, path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// True when a snapshot was committed before the failure, so no backup
    /// data is at risk and only the latest pointer is stale.
    pub fn is_data_safe(&self) -> bool {
        matches!(
            self,
            BackupError::PointerUpdate { .. } | BackupError::PointerNotSymlink { .. }
        )
    }

    /// True for failures detected before any transaction step ran.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            BackupError::Usage(_)
                | BackupError::SourceMissing(_)
                | BackupError::DestinationMissing(_)
                | BackupError::PrimitiveUnavailable(_)
                | BackupError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_errors_are_data_safe() {
        let err = BackupError::PointerUpdate {
            snapshot: "2024-01-01__00-00-00".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.is_data_safe());
        assert!(!err.is_usage());

        let err = BackupError::Commit {
            staging: PathBuf::from("/dst/.inprogress"),
            snapshot: PathBuf::from("/dst/2024-01-01__00-00-00"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!err.is_data_safe());
    }

    #[test]
    fn test_usage_classification() {
        assert!(BackupError::SourceMissing(PathBuf::from("/nope")).is_usage());
        assert!(BackupError::PrimitiveUnavailable("rsync".into()).is_usage());
        assert!(!BackupError::SnapshotExists("x".into()).is_usage());
    }
}
