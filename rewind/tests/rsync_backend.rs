//! The rsync backend driven through a full transaction, with a shell script
//! standing in for the rsync binary.

use chrono::{Local, TimeZone};
use rewind::snapshot::{DestinationRoot, FixedClock, PointerState};
use rewind::sync::{RsyncPrimitive, SyncError, SyncPrimitive};
use rewind::{BackupError, BackupPlan, Transaction};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Fixture {
    temp: TempDir,
    source: PathBuf,
    dest: PathBuf,
}

impl Fixture {
    fn new() -> io::Result<Self> {
        let temp = TempDir::new()?;
        let source = temp.path().join("data");
        let dest = temp.path().join("backups");
        fs::create_dir(&source)?;
        fs::create_dir(&dest)?;
        fs::write(source.join("a.txt"), b"a")?;
        Ok(Self { temp, source, dest })
    }

    fn log_path(&self) -> PathBuf {
        self.temp.path().join("rsync.args")
    }

    /// Records its arguments, one per line, then leaves a residue directory
    /// in the staging entry and exits with `code`.
    fn fake_rsync(&self, code: i32) -> io::Result<PathBuf> {
        let script = self.temp.path().join(format!("rsync-{code}"));
        fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 printf '%s\\n' \"$@\" > '{log}'\n\
                 for last; do :; done\n\
                 if [ {code} -ne 0 ]; then mkdir -p \"${{last}}.partial\"; fi\n\
                 exit {code}\n",
                log = self.log_path().display(),
            ),
        )?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
        Ok(script)
    }

    fn recorded_args(&self) -> io::Result<Vec<String>> {
        Ok(fs::read_to_string(self.log_path())?
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn root(&self) -> DestinationRoot {
        DestinationRoot::new(&self.dest)
    }
}

fn at(second: u32) -> FixedClock {
    FixedClock(Local.with_ymd_and_hms(2024, 6, 1, 8, 0, second).unwrap())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn test_rsync_receives_fixed_options_then_extras() -> rewind::Result<()> {
    let fx = Fixture::new()?;
    let rsync = RsyncPrimitive::new(display(&fx.fake_rsync(0)?));
    rsync.check_available()?;

    let plan = BackupPlan::new(&fx.source, &fx.dest)
        .with_extra_options(vec!["--exclude=*.tmp".to_string()]);
    let first_clock = at(0);
    let first = Transaction::new(plan.clone(), &rsync)
        .with_clock(&first_clock)
        .run()?;

    let staging = format!("{}/", display(&fx.root().staging_path()));
    assert_eq!(
        fx.recorded_args()?,
        vec![
            "--recursive".to_string(),
            "--times".to_string(),
            "--delete".to_string(),
            "--delete-excluded".to_string(),
            "--partial-dir=.partial".to_string(),
            "--exclude=*.tmp".to_string(),
            format!("{}/", display(&fx.source)),
            staging.clone(),
        ]
    );
    assert!(fx.root().snapshot_path(&first.snapshot).is_dir());

    let second_clock = at(1);
    let second = Transaction::new(plan, &rsync)
        .with_clock(&second_clock)
        .run()?;

    let args = fx.recorded_args()?;
    assert_eq!(args[5], "--link-dest=../current");
    assert_eq!(args[6], "--exclude=*.tmp");
    assert_eq!(args[8], staging);
    assert_eq!(second.baseline, Some(first.snapshot));
    assert_eq!(
        fx.root().latest_pointer()?,
        PointerState::Snapshot(second.snapshot)
    );
    Ok(())
}

#[test]
fn test_single_file_source_commits_a_directory() -> rewind::Result<()> {
    let fx = Fixture::new()?;
    let rsync = RsyncPrimitive::new(display(&fx.fake_rsync(0)?));
    let file = fx.source.join("a.txt");

    let clock = at(0);
    let report = Transaction::new(BackupPlan::new(&file, &fx.dest), &rsync)
        .with_clock(&clock)
        .run()?;

    let args = fx.recorded_args()?;
    assert_eq!(args[5], display(&file));
    assert!(args[6].ends_with(".inprogress/"));
    assert!(fx.root().snapshot_path(&report.snapshot).is_dir());
    assert_eq!(
        fx.root().latest_pointer()?,
        PointerState::Snapshot(report.snapshot)
    );
    Ok(())
}

#[test]
fn test_rsync_failure_keeps_staging_for_resume() -> rewind::Result<()> {
    let fx = Fixture::new()?;
    let rsync = RsyncPrimitive::new(display(&fx.fake_rsync(23)?));

    let mut tx = Transaction::new(BackupPlan::new(&fx.source, &fx.dest), &rsync);
    let err = tx.run().unwrap_err();

    assert!(matches!(
        err,
        BackupError::Transfer(SyncError::Failed { code: Some(23), .. })
    ));
    let root = fx.root();
    assert!(root.has_staging());
    assert!(root.partial_path().is_dir());
    assert!(root.snapshots()?.is_empty());
    assert_eq!(root.latest_pointer()?, PointerState::Absent);
    assert!(!root.lock_path().exists());
    Ok(())
}
