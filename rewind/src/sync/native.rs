//! In-process backend for local destinations.
//!
//! Mirrors the rsync option set the coordinator relies on: recursive copy,
//! delete-mirroring (including excluded entries), a partial directory for
//! interrupted files, and hardlinking unchanged files from the baseline.
//! Files are always written under the partial directory and renamed into
//! place, so a file hardlinked from the baseline is never modified.

use fast_rsync::{apply, diff, Signature, SignatureOptions};
use std::collections::HashSet;
use std::fs::{self, File, Metadata};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::filter::ExcludeRules;
use super::{SyncError, SyncPrimitive, SyncRequest, SyncStats};

/// Block size for the delta against a partial residue (16KB)
const RESUME_BLOCK_SIZE: u32 = 16 * 1024;

/// Residues of files larger than this are discarded rather than used as a
/// delta basis, since the delta needs both files in memory.
const RESUME_DELTA_LIMIT: u64 = 256 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct NativePrimitive;

impl NativePrimitive {
    pub fn new() -> Self {
        Self
    }
}

impl SyncPrimitive for NativePrimitive {
    fn name(&self) -> &str {
        "native"
    }

    fn check_available(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn run(&self, request: &SyncRequest) -> Result<SyncStats, SyncError> {
        let excludes = parse_options(&request.extra_options)?;
        let source_meta =
            fs::metadata(&request.source).map_err(|e| SyncError::io(&request.source, e))?;
        fs::create_dir_all(&request.staging).map_err(|e| SyncError::io(&request.staging, e))?;

        let mut transfer = Transfer::new(request);

        if source_meta.is_dir() {
            transfer.copy_tree(&excludes)?;
        } else {
            let name = request.source.file_name().map(PathBuf::from).ok_or_else(|| {
                SyncError::io(
                    &request.source,
                    io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"),
                )
            })?;
            transfer.sync_file(&request.source, &name, &source_meta)?;
        }

        transfer.delete_extraneous()?;
        transfer.discard_residue()?;

        let stats = transfer.stats;
        info!(
            transferred = stats.transferred_files,
            resumed = stats.resumed_files,
            linked = stats.linked_files,
            unchanged = stats.unchanged_files,
            deleted = stats.deleted_entries,
            bytes = stats.transferred_bytes,
            "Native transfer complete"
        );
        Ok(stats)
    }
}

fn parse_options(options: &[String]) -> Result<ExcludeRules, SyncError> {
    let mut excludes = ExcludeRules::default();
    let mut iter = options.iter();
    while let Some(option) = iter.next() {
        if let Some(pattern) = option.strip_prefix("--exclude=") {
            excludes.add(pattern)?;
        } else if option == "--exclude" {
            let pattern = iter.next().ok_or_else(|| SyncError::UnsupportedOption {
                backend: "native".to_string(),
                option: "--exclude (missing pattern)".to_string(),
            })?;
            excludes.add(pattern)?;
        } else {
            return Err(SyncError::UnsupportedOption {
                backend: "native".to_string(),
                option: option.clone(),
            });
        }
    }
    Ok(excludes)
}

struct Transfer<'a> {
    request: &'a SyncRequest,
    partial_root: PathBuf,
    /// Relative paths present in the source after filtering.
    seen: HashSet<PathBuf>,
    stats: SyncStats,
}

impl<'a> Transfer<'a> {
    fn new(request: &'a SyncRequest) -> Self {
        Self {
            request,
            partial_root: request.staging.join(&request.partial_dir),
            seen: HashSet::new(),
            stats: SyncStats::default(),
        }
    }

    fn copy_tree(&mut self, excludes: &ExcludeRules) -> Result<(), SyncError> {
        let source = self.request.source.clone();
        let partial_name = PathBuf::from(&self.request.partial_dir);

        let walker = WalkDir::new(&source)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let Ok(relative) = entry.path().strip_prefix(&source) else {
                    return true;
                };
                // The residue directory name is reserved at the top level.
                if relative == partial_name {
                    return false;
                }
                !excludes.is_excluded(relative, entry.file_type().is_dir())
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.clone());
                SyncError::io(path, e.into())
            })?;
            let relative = entry
                .path()
                .strip_prefix(&source)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                self.sync_dir(&relative)?;
            } else if file_type.is_file() {
                let meta = entry
                    .metadata()
                    .map_err(|e| SyncError::io(entry.path(), e.into()))?;
                self.sync_file(entry.path(), &relative, &meta)?;
            } else {
                debug!(path = %entry.path().display(), "Skipping non-regular file");
            }
        }

        Ok(())
    }

    fn sync_dir(&mut self, relative: &Path) -> Result<(), SyncError> {
        let dest = self.request.staging.join(relative);
        match fs::symlink_metadata(&dest) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                fs::remove_file(&dest).map_err(|e| SyncError::io(&dest, e))?;
                fs::create_dir(&dest).map_err(|e| SyncError::io(&dest, e))?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&dest).map_err(|e| SyncError::io(&dest, e))?;
            }
            Err(e) => return Err(SyncError::io(&dest, e)),
        }
        self.seen.insert(relative.to_path_buf());
        Ok(())
    }

    fn sync_file(
        &mut self,
        source: &Path,
        relative: &Path,
        meta: &Metadata,
    ) -> Result<(), SyncError> {
        self.seen.insert(relative.to_path_buf());

        let dest = self.request.staging.join(relative);
        let size = meta.len();
        let mtime = meta.modified().map_err(|e| SyncError::io(source, e))?;

        // Already complete from an earlier, interrupted run.
        if let Ok(existing) = fs::symlink_metadata(&dest) {
            if existing.is_file() && quick_check_matches(&existing, size, mtime) {
                self.stats.unchanged_files += 1;
                return Ok(());
            }
        }

        if let Some(baseline) = &self.request.baseline {
            let basis = baseline.resolved.join(relative);
            let unchanged = fs::symlink_metadata(&basis)
                .map(|m| m.is_file() && quick_check_matches(&m, size, mtime))
                .unwrap_or(false);
            if unchanged {
                match link_from_baseline(&basis, &dest) {
                    Ok(()) => {
                        self.stats.linked_files += 1;
                        return Ok(());
                    }
                    Err(e) => {
                        debug!(path = %relative.display(), error = %e, "Hardlink from baseline failed, copying");
                    }
                }
            }
        }

        self.transfer(source, relative, &dest, size, mtime)
    }

    fn transfer(
        &mut self,
        source: &Path,
        relative: &Path,
        dest: &Path,
        size: u64,
        mtime: SystemTime,
    ) -> Result<(), SyncError> {
        let partial = self.partial_root.join(relative);
        if let Some(parent) = partial.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        let residue = fs::symlink_metadata(&partial)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);

        if residue && size <= RESUME_DELTA_LIMIT {
            debug!(path = %relative.display(), "Resuming from partial residue");
            rebuild_from_residue(source, &partial).map_err(|e| SyncError::io(&partial, e))?;
            self.stats.resumed_files += 1;
        } else {
            copy_into(source, &partial).map_err(|e| SyncError::io(&partial, e))?;
        }

        stamp_mtime(&partial, mtime).map_err(|e| SyncError::io(&partial, e))?;
        remove_dir_in_the_way(dest)?;
        fs::rename(&partial, dest).map_err(|e| SyncError::io(dest, e))?;

        self.stats.transferred_files += 1;
        self.stats.transferred_bytes += size;
        Ok(())
    }

    /// Remove staging entries with no counterpart in the filtered source.
    fn delete_extraneous(&mut self) -> Result<(), SyncError> {
        let staging = self.request.staging.clone();
        let partial_root = self.partial_root.clone();

        let mut doomed = Vec::new();
        let mut walker = WalkDir::new(&staging)
            .follow_links(false)
            .min_depth(1)
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| staging.clone());
                SyncError::io(path, e.into())
            })?;
            let is_dir = entry.file_type().is_dir();
            if entry.path() == partial_root {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            let relative = match entry.path().strip_prefix(&staging) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            if !self.seen.contains(relative) {
                doomed.push((entry.path().to_path_buf(), is_dir));
                if is_dir {
                    walker.skip_current_dir();
                }
            }
        }

        for (path, is_dir) in doomed {
            let result = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted");
                    self.stats.deleted_entries += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::io(&path, e)),
            }
        }

        Ok(())
    }

    /// A finished transfer has consumed or obsoleted every residue file.
    fn discard_residue(&self) -> Result<(), SyncError> {
        match fs::remove_dir_all(&self.partial_root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(&self.partial_root, e)),
        }
    }
}

/// Size plus whole-second modification time, as rsync's quick check.
fn quick_check_matches(meta: &Metadata, size: u64, mtime: SystemTime) -> bool {
    meta.len() == size
        && meta
            .modified()
            .map(|m| epoch_secs(m) == epoch_secs(mtime))
            .unwrap_or(false)
}

fn epoch_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

fn link_from_baseline(basis: &Path, dest: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest)?,
        Ok(_) => fs::remove_file(dest)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::hard_link(basis, dest)
}

fn remove_dir_in_the_way(dest: &Path) -> Result<(), SyncError> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest).map_err(|e| SyncError::io(dest, e)),
        _ => Ok(()),
    }
}

fn copy_into(source: &Path, partial: &Path) -> io::Result<u64> {
    let mut reader = File::open(source)?;
    let mut writer = BufWriter::new(File::create(partial)?);
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.into_inner().map_err(|e| e.into_error())?;
    Ok(copied)
}

/// The residue serves as the delta basis, as rsync does with `--partial-dir`.
fn rebuild_from_residue(source: &Path, partial: &Path) -> io::Result<usize> {
    let basis = fs::read(partial)?;
    let data = fs::read(source)?;

    let signature = Signature::calculate(
        &basis,
        SignatureOptions {
            block_size: RESUME_BLOCK_SIZE,
            crypto_hash_size: 8,
        },
    );

    let mut delta = Vec::new();
    diff(&signature.index(), &data, &mut delta)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{:?}", e)))?;

    let mut rebuilt = Vec::with_capacity(data.len());
    apply(&basis, &delta, &mut rebuilt)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    debug!(
        basis = basis.len(),
        delta = delta.len(),
        size = rebuilt.len(),
        "Rebuilt file from residue"
    );
    fs::write(partial, &rebuilt)?;
    Ok(rebuilt.len())
}

fn stamp_mtime(path: &Path, mtime: SystemTime) -> io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(mtime)
}
