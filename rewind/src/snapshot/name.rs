//! Snapshot naming.
//!
//! A snapshot is named by the local wall-clock second it was committed,
//! formatted fixed-width so lexicographic order equals chronological order.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::fmt;

/// `YYYY-MM-DD__HH-MM-SS`
pub const SNAPSHOT_FORMAT: &str = "%Y-%m-%d__%H-%M-%S";

const SNAPSHOT_NAME_LEN: usize = 20;

/// Name of a committed snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotName(String);

impl SnapshotName {
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(at.format(SNAPSHOT_FORMAT).to_string())
    }

    /// Parse a directory name, accepting only the canonical fixed-width form.
    pub fn parse(name: &str) -> Option<Self> {
        if name.len() != SNAPSHOT_NAME_LEN {
            return None;
        }
        let parsed = NaiveDateTime::parse_from_str(name, SNAPSHOT_FORMAT).ok()?;
        // Round-trip to reject forms chrono tolerates, such as missing zero padding.
        if parsed.format(SNAPSHOT_FORMAT).to_string() != name {
            return None;
        }
        Some(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::path::Path> for SnapshotName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

/// Source of the commit timestamp.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;

    fn snapshot_name(&self) -> SnapshotName {
        SnapshotName::from_datetime(&self.now())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock pinned to a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}
