//! Backup transaction coordinator.
//!
//! A run moves through three strictly sequential phases with no rollback:
//!
//! 1. transfer into the fixed-name staging entry, linking against the
//!    snapshot the latest pointer targets;
//! 2. commit by renaming the staging entry to a timestamped snapshot name;
//! 3. swap the latest pointer to the new snapshot.
//!
//! Any failure before the commit leaves the staging entry (and the
//! primitive's partial residue) in place, so running the same command again
//! resumes the transfer. The destination is single-writer; the advisory
//! lock turns a concurrent run into an error instead of a race.

pub mod plan;
pub mod pointer;

use std::fmt;
use std::fs;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::lock::DestinationLock;
use crate::snapshot::{Clock, DestinationRoot, SnapshotName, SystemClock, PARTIAL_DIR_NAME};
use crate::sync::{Baseline, SyncPrimitive, SyncRequest, SyncStats};
use crate::utils::errors::{BackupError, Result};

pub use plan::BackupPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Transferring,
    Transferred,
    Committing,
    PointerUpdate,
    Done,
    Failed,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxState::Idle => "idle",
            TxState::Transferring => "transferring",
            TxState::Transferred => "transferred",
            TxState::Committing => "committing",
            TxState::PointerUpdate => "pointer-update",
            TxState::Done => "done",
            TxState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct TransactionReport {
    pub snapshot: SnapshotName,
    pub baseline: Option<SnapshotName>,
    /// A staging entry from an earlier run was picked up.
    pub resumed: bool,
    pub stats: SyncStats,
    pub elapsed: Duration,
}

pub struct Transaction<'a> {
    plan: BackupPlan,
    root: DestinationRoot,
    primitive: &'a dyn SyncPrimitive,
    clock: &'a dyn Clock,
    state: TxState,
}

impl<'a> Transaction<'a> {
    pub fn new(plan: BackupPlan, primitive: &'a dyn SyncPrimitive) -> Self {
        let root = DestinationRoot::new(&plan.destination);
        Self {
            plan,
            root,
            primitive,
            clock: &SystemClock,
            state: TxState::Idle,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn root(&self) -> &DestinationRoot {
        &self.root
    }

    /// Run the transaction to completion or to the first failure.
    pub fn run(&mut self) -> Result<TransactionReport> {
        let result = self.run_phases();
        if let Err(e) = &result {
            self.transition(TxState::Failed);
            if e.is_data_safe() {
                error!(error = %e, "Snapshot is safe but the latest pointer is stale");
            }
        }
        result
    }

    fn run_phases(&mut self) -> Result<TransactionReport> {
        let started = Instant::now();

        let lock = if self.plan.lock {
            let lock = DestinationLock::acquire(&self.root.lock_path())?;
            debug!(pid = lock.meta().pid, "Holding destination lock");
            Some(lock)
        } else {
            None
        };

        let resumed = self.root.has_staging();
        if resumed {
            info!(
                staging = %self.root.staging_path().display(),
                "Resuming from existing staging entry"
            );
        }

        let baseline = self.root.baseline()?;
        match &baseline {
            Some(name) => info!(baseline = %name, "Linking unchanged files against baseline"),
            None => info!("No baseline snapshot, running a full transfer"),
        }

        self.transition(TxState::Transferring);
        let stats = self.transfer(baseline.as_ref())?;
        self.transition(TxState::Transferred);

        self.discard_empty_residue();

        self.transition(TxState::Committing);
        let snapshot = self.commit()?;

        self.transition(TxState::PointerUpdate);
        pointer::swap(&self.root, &snapshot)?;

        self.transition(TxState::Done);

        // The snapshot and pointer are final; a stale lock file is harmless.
        if let Some(lock) = lock {
            if let Err(e) = lock.release() {
                warn!(path = %self.root.lock_path().display(), error = %e, "Failed to remove lock file");
            }
        }

        let report = TransactionReport {
            snapshot,
            baseline,
            resumed,
            stats,
            elapsed: started.elapsed(),
        };
        info!(
            snapshot = %report.snapshot,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Backup complete"
        );
        Ok(report)
    }

    fn transfer(&self, baseline: Option<&SnapshotName>) -> Result<SyncStats> {
        let request = SyncRequest {
            source: self.plan.source.clone(),
            staging: self.root.staging_path(),
            baseline: baseline.map(|name| Baseline {
                link: DestinationRoot::baseline_link(),
                resolved: self.root.snapshot_path(name),
            }),
            partial_dir: PARTIAL_DIR_NAME.to_string(),
            extra_options: self.plan.extra_options.clone(),
        };

        info!(
            source = %request.source.display(),
            staging = %request.staging.display(),
            backend = self.primitive.name(),
            "Transferring"
        );

        self.primitive.run(&request).map_err(|e| {
            warn!(
                staging = %request.staging.display(),
                "Transfer failed; staging entry kept, re-run to resume"
            );
            BackupError::Transfer(e)
        })
    }

    /// rsync removes an empty partial directory itself, but not every
    /// backend does. A non-empty one is left alone.
    fn discard_empty_residue(&self) {
        let partial = self.root.partial_path();
        match fs::remove_dir(&partial) {
            Ok(()) => debug!(path = %partial.display(), "Removed empty residue directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %partial.display(), error = %e, "Residue directory left in place"),
        }
    }

    fn commit(&self) -> Result<SnapshotName> {
        let snapshot = self.clock.snapshot_name();
        let staging = self.root.staging_path();
        let target = self.root.snapshot_path(&snapshot);

        if fs::symlink_metadata(&target).is_ok() {
            return Err(BackupError::SnapshotExists(snapshot.to_string()));
        }

        if let Some(latest) = self.root.snapshots()?.last() {
            if &snapshot < latest {
                warn!(
                    snapshot = %snapshot,
                    latest = %latest,
                    "Clock is behind the newest snapshot; history order will not match commit order"
                );
            }
        }

        fs::rename(&staging, &target).map_err(|source| BackupError::Commit {
            staging: staging.clone(),
            snapshot: target.clone(),
            source,
        })?;

        info!(snapshot = %snapshot, "Committed snapshot");
        Ok(snapshot)
    }

    fn transition(&mut self, next: TxState) {
        debug!(from = %self.state, to = %next, "Transaction state");
        self.state = next;
    }
}
