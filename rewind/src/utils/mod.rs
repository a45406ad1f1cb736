//! Utility modules for rewind.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
