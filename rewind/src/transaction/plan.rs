//! Inputs of a backup run, validated before any transaction step.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::sync::SyncPrimitive;
use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Passed to the sync primitive after its fixed options, in order.
    pub extra_options: Vec<String>,
    pub lock: bool,
}

impl BackupPlan {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            extra_options: Vec::new(),
            lock: true,
        }
    }

    pub fn with_extra_options(mut self, options: Vec<String>) -> Self {
        self.extra_options = options;
        self
    }

    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Fail fast, without touching the destination, if the run cannot start.
    pub fn validate(&self, primitive: &dyn SyncPrimitive) -> Result<()> {
        match fs::metadata(&self.source) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::SourceMissing(self.source.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        match fs::metadata(&self.destination) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(BackupError::Usage(format!(
                    "destination is not a directory: {}",
                    self.destination.display()
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::DestinationMissing(self.destination.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        primitive
            .check_available()
            .map_err(|e| BackupError::PrimitiveUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{NativePrimitive, RsyncPrimitive};
    use tempfile::TempDir;

    #[test]
    fn test_valid_plan() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let plan = BackupPlan::new(temp_dir.path(), temp_dir.path());
        plan.validate(&NativePrimitive::new())
    }

    #[test]
    fn test_missing_paths() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let missing = temp_dir.path().join("missing");

        let err = BackupPlan::new(&missing, temp_dir.path())
            .validate(&NativePrimitive::new())
            .unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));

        let err = BackupPlan::new(temp_dir.path(), &missing)
            .validate(&NativePrimitive::new())
            .unwrap_err();
        assert!(matches!(err, BackupError::DestinationMissing(_)));
        assert!(!missing.exists());
        Ok(())
    }

    #[test]
    fn test_destination_must_be_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("file");
        fs::write(&file, b"x")?;

        let err = BackupPlan::new(temp_dir.path(), &file)
            .validate(&NativePrimitive::new())
            .unwrap_err();
        assert!(matches!(err, BackupError::Usage(_)));
        Ok(())
    }

    #[test]
    fn test_missing_primitive() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let err = BackupPlan::new(temp_dir.path(), temp_dir.path())
            .validate(&RsyncPrimitive::new("rewind-no-such-rsync-binary"))
            .unwrap_err();
        assert!(matches!(err, BackupError::PrimitiveUnavailable(_)));
        Ok(())
    }
}
