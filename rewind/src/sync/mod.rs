//! Sync primitive adapter.
//!
//! A backup run hands one [`SyncRequest`] to a [`SyncPrimitive`] and waits
//! for it to finish. The primitive owns the partial-transfer residue; the
//! coordinator only decides where the staging entry is and which snapshot
//! serves as the baseline.

pub mod filter;
pub mod native;
pub mod rsync;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use native::NativePrimitive;
pub use rsync::RsyncPrimitive;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{0} is not available: {1}")]
    Unavailable(String, String),

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}", code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()))]
    Failed { program: String, code: Option<i32> },

    #[error("unsupported option for {backend} backend: {option}")]
    UnsupportedOption { backend: String, option: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The previous snapshot unchanged files are linked against.
#[derive(Debug, Clone)]
pub struct Baseline {
    /// Path relative to the staging entry, through the latest pointer.
    pub link: PathBuf,
    /// Resolved absolute path of the snapshot.
    pub resolved: PathBuf,
}

/// One invocation of the sync primitive.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub source: PathBuf,
    pub staging: PathBuf,
    pub baseline: Option<Baseline>,
    /// Residue directory name, relative to the staging entry.
    pub partial_dir: String,
    /// Appended after the fixed options, in order.
    pub extra_options: Vec<String>,
}

/// What a transfer did. Backends that cannot observe this report zeros.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub transferred_files: usize,
    pub transferred_bytes: u64,
    pub resumed_files: usize,
    pub linked_files: usize,
    pub unchanged_files: usize,
    pub deleted_entries: usize,
}

/// A bulk file-transfer mechanism.
pub trait SyncPrimitive {
    fn name(&self) -> &str;

    /// Fails if the mechanism cannot run in this environment.
    fn check_available(&self) -> Result<(), SyncError>;

    /// Run one synchronous transfer into `request.staging`.
    fn run(&self, request: &SyncRequest) -> Result<SyncStats, SyncError>;
}

impl<T: SyncPrimitive + ?Sized> SyncPrimitive for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn check_available(&self) -> Result<(), SyncError> {
        (**self).check_available()
    }

    fn run(&self, request: &SyncRequest) -> Result<SyncStats, SyncError> {
        (**self).run(request)
    }
}

/// Available transfer backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// External rsync binary
    #[default]
    Rsync,
    /// In-process transfer for local destinations
    Native,
}

impl Backend {
    pub fn build(self, rsync_path: &str) -> Box<dyn SyncPrimitive> {
        match self {
            Backend::Rsync => Box::new(RsyncPrimitive::new(rsync_path)),
            Backend::Native => Box::new(NativePrimitive::new()),
        }
    }
}

