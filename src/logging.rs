//! Tracing setup for the binary.
//!
//! Human-readable events go to stderr, so stdout stays clean for progress
//! lines and `--json` output. With a log directory, the same events are also
//! appended to a daily-rotated `media-batch.log` there.
//!
//! The filter defaults to [`DEFAULT_FILTER`] and is overridden by `RUST_LOG`.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "media_batch=info";
pub const LOG_FILE_NAME: &str = "media-batch.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Call once, before the engine starts.
pub fn init(log_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let file = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_NAME);
            Some(fmt::layer().with_ansi(false).with_writer(appender))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(console)
        .with(file)
        .try_init()?;
    Ok(())
}
