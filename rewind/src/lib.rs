//! Rewind library
//!
//! Atomic, resumable, incremental point-in-time backups. Each run transfers
//! into a fixed staging entry, commits it by rename to a timestamped
//! snapshot, then moves the `current` symlink to it.

pub mod config;
pub mod lock;
pub mod snapshot;
pub mod sync;
pub mod transaction;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use transaction::{BackupPlan, Transaction, TransactionReport};
pub use utils::errors::{BackupError, Result};
