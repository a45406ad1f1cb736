//! Backup set model: snapshot names, the fixed entries of a destination
//! root, and baseline lookup.

pub mod layout;
pub mod name;

pub use layout::{
    DestinationRoot, PointerState, LOCK_NAME, PARTIAL_DIR_NAME, POINTER_NAME, POINTER_TMP_NAME,
    STAGING_NAME,
};
pub use name::{Clock, FixedClock, SnapshotName, SystemClock, SNAPSHOT_FORMAT};
