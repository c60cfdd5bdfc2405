//! Tracing subscriber setup.
//!
//! Console output is compact text or JSON. When a log file is configured a
//! second, non-ANSI layer writes to it through a daily-rotating
//! non-blocking appender; the returned guard must be held until exit so
//! buffered lines are flushed.

use crate::config::LoggingSection;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Filter from `RUST_LOG`, falling back to `level`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Returns the file writer guard, if any.
pub fn init(settings: &LoggingSection) -> anyhow::Result<Option<WorkerGuard>> {
    let console = if settings.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().compact().with_target(false).boxed()
    };

    let (file_layer, guard) = match settings.file.as_deref() {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(&settings.level))
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

fn file_appender(path: &Path) -> anyhow::Result<rolling::RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "omnirouter.log".to_string());
    std::fs::create_dir_all(dir)?;
    Ok(rolling::daily(dir, prefix))
}
