//! Rewind - main entry point
//!
//! Exit status is 0 when the snapshot was committed and the latest pointer
//! updated, 1 on any error.

use clap::error::ErrorKind;
use clap::Parser;
use rewind::sync::Backend;
use rewind::{utils, BackupError, BackupPlan, Config, Transaction};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print progress messages
    #[arg(short, long)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transfer backend (overrides config)
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Directory or file to back up
    source: PathBuf,

    /// Existing directory holding the snapshots
    destination: PathBuf,

    /// Options passed to the transfer backend after its fixed options
    #[arg(last = true, value_name = "EXTRA")]
    extra: Vec<String>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = utils::logger::init(&Config::default().log.level, false);
            tracing::error!("{}", e.to_string().trim_end());
            return ExitCode::FAILURE;
        }
    };

    let loaded = Config::load(args.config.as_deref());
    let level = match &loaded {
        Ok(config) => config.log.level.clone(),
        Err(_) => Config::default().log.level,
    };

    if let Err(e) = utils::logger::init(&level, args.verbose) {
        eprintln!("rewind: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_usage() || e.is_data_safe() {
                tracing::error!("{}", e);
            } else {
                tracing::error!(error = %e, "Backup failed");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args, config: Config) -> Result<(), BackupError> {
    let backend = args.backend.unwrap_or(config.sync.backend);
    let primitive = backend.build(&config.sync.rsync_path);

    let mut extra_options = config.sync.extra_options.clone();
    extra_options.extend(args.extra);

    let plan = BackupPlan::new(args.source, args.destination)
        .with_extra_options(extra_options)
        .with_lock(config.lock.enabled);
    plan.validate(primitive.as_ref())?;

    tracing::info!(
        "Starting rewind v{} ({} backend)",
        env!("CARGO_PKG_VERSION"),
        primitive.name()
    );

    let report = Transaction::new(plan, primitive.as_ref()).run()?;
    tracing::info!(
        snapshot = %report.snapshot,
        resumed = report.resumed,
        transferred = report.stats.transferred_files,
        linked = report.stats.linked_files,
        "Snapshot is now the latest"
    );
    Ok(())
}
