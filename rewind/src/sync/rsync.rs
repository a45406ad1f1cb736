//! rsync backend.
//!
//! Fixed options come first so user options can add or override flags but
//! never drop the safety semantics. Modification times are always kept,
//! since rsync's quick check compares them both against `--link-dest` and
//! against files already complete in the staging entry. Symlinks, ownership
//! and permissions are left off: some NAS targets reject them. Pass `-a`
//! (or the individual flags) after `--` to turn them back on.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use super::{SyncError, SyncPrimitive, SyncRequest, SyncStats};

pub struct RsyncPrimitive {
    program: String,
}

impl RsyncPrimitive {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn resolve(&self) -> Result<PathBuf, SyncError> {
        which::which(&self.program)
            .map_err(|e| SyncError::Unavailable(self.program.clone(), e.to_string()))
    }

    /// Full argument list for one invocation, excluding the program itself.
    pub fn build_args(request: &SyncRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--recursive".into(),
            "--times".into(),
            "--delete".into(),
            "--delete-excluded".into(),
            format!("--partial-dir={}", request.partial_dir).into(),
        ];

        if let Some(baseline) = &request.baseline {
            let mut link_dest = OsString::from("--link-dest=");
            link_dest.push(baseline.link.as_os_str());
            args.push(link_dest);
        }

        args.extend(request.extra_options.iter().map(OsString::from));

        args.push(source_arg(&request.source));
        args.push(staging_arg(&request.staging));
        args
    }
}

/// A directory source gets a trailing slash so its contents land directly
/// in the staging entry rather than in a subdirectory of it.
fn source_arg(source: &Path) -> OsString {
    let mut arg = source.as_os_str().to_owned();
    if source.is_dir() && !arg.to_string_lossy().ends_with('/') {
        arg.push("/");
    }
    arg
}

/// The staging entry is always a directory, even for a single-file source.
fn staging_arg(staging: &Path) -> OsString {
    let mut arg = staging.as_os_str().to_owned();
    if !arg.to_string_lossy().ends_with('/') {
        arg.push("/");
    }
    arg
}

impl SyncPrimitive for RsyncPrimitive {
    fn name(&self) -> &str {
        "rsync"
    }

    fn check_available(&self) -> Result<(), SyncError> {
        self.resolve().map(|path| {
            debug!(path = %path.display(), "Found rsync");
        })
    }

    fn run(&self, request: &SyncRequest) -> Result<SyncStats, SyncError> {
        let program = self.resolve()?;
        let args = Self::build_args(request);

        fs::create_dir_all(&request.staging).map_err(|e| SyncError::io(&request.staging, e))?;

        info!(
            "Running {} {}",
            program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let status = Command::new(&program)
            .args(&args)
            .status()
            .map_err(|source| SyncError::Launch {
                program: program.display().to_string(),
                source,
            })?;

        if !status.success() {
            return Err(SyncError::Failed {
                program: self.program.clone(),
                code: status.code(),
            });
        }

        Ok(SyncStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Baseline;
    use tempfile::TempDir;

    fn request(source: PathBuf, baseline: Option<Baseline>, extra: &[&str]) -> SyncRequest {
        SyncRequest {
            source,
            staging: PathBuf::from("/dst/.inprogress"),
            baseline,
            partial_dir: ".partial".to_string(),
            extra_options: extra.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_first_backup_has_no_link_dest() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let args = strings(RsyncPrimitive::build_args(&request(
            temp_dir.path().to_path_buf(),
            None,
            &[],
        )));

        assert_eq!(
            &args[..5],
            [
                "--recursive",
                "--times",
                "--delete",
                "--delete-excluded",
                "--partial-dir=.partial"
            ]
        );
        assert!(!args.iter().any(|a| a.starts_with("--link-dest")));
        assert_eq!(args[5], format!("{}/", temp_dir.path().display()));
        assert_eq!(args[6], "/dst/.inprogress/");
        assert_eq!(args.len(), 7);
        Ok(())
    }

    #[test]
    fn test_extra_options_follow_fixed_options() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let baseline = Baseline {
            link: PathBuf::from("../current"),
            resolved: PathBuf::from("/dst/2024-01-01__00-00-00"),
        };
        let args = strings(RsyncPrimitive::build_args(&request(
            temp_dir.path().to_path_buf(),
            Some(baseline),
            &["-a", "--exclude=*.tmp"],
        )));

        let times = args.iter().position(|a| a == "--times").unwrap();
        let link = args.iter().position(|a| a == "--link-dest=../current").unwrap();
        let archive = args.iter().position(|a| a == "-a").unwrap();
        let exclude = args.iter().position(|a| a == "--exclude=*.tmp").unwrap();
        assert!(times < link);
        assert!(link < archive);
        assert!(archive < exclude);
        assert_eq!(args.len(), 10);
        Ok(())
    }

    #[test]
    fn test_file_source_keeps_its_path() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"a")?;

        let args = strings(RsyncPrimitive::build_args(&request(file.clone(), None, &[])));
        assert_eq!(args[5], file.display().to_string());
        assert_eq!(args[6], "/dst/.inprogress/");
        Ok(())
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let primitive = RsyncPrimitive::new("rewind-no-such-rsync-binary");
        assert!(matches!(
            primitive.check_available(),
            Err(SyncError::Unavailable(..))
        ));
    }
}
