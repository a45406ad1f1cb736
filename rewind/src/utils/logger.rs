//! Logging configuration using tracing.
//!
//! Progress lines go to stdout and only when verbose; warnings and errors
//! always go to stderr. Both carry a local `YYYY-MM-DD HH:MM:SS` timestamp.

use std::fmt;

use tracing::{Level, Metadata};
use tracing_subscriber::{
    filter::filter_fn, fmt::format::Writer, fmt::time::FormatTime, layer::SubscriberExt,
    util::SubscriberInitExt, EnvFilter, Layer,
};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local wall-clock timer for log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format(TIMESTAMP_FORMAT))
    }
}

fn is_progress(meta: &Metadata<'_>) -> bool {
    *meta.level() >= Level::INFO
}

fn is_problem(meta: &Metadata<'_>) -> bool {
    *meta.level() <= Level::WARN
}

/// Initialize logging.
///
/// `level` is used when `RUST_LOG` is unset. Without `verbose`, only
/// warnings and errors are emitted.
pub fn init(level: &str, verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { level } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_timer(LocalTimer)
        .with_target(false)
        .with_filter(filter_fn(move |meta| verbose && is_progress(meta)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(LocalTimer)
        .with_target(false)
        .with_filter(filter_fn(is_problem));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format_shape() {
        let stamp = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(7, 5, 1))
            .unwrap()
            .format(TIMESTAMP_FORMAT)
            .to_string();
        assert_eq!(stamp, "2024-03-09 07:05:01");
    }
}
