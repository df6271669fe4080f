use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber: the console at `level`, plus everything
/// down to debug in `debug_log` when given.
///
/// Keep the returned guard alive until exit so the file writer flushes.
pub fn init(level: Level, debug_log: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_filter = EnvFilter::default().add_directive(LevelFilter::from_level(level).into());
    let console = fmt::layer()
        .with_timer(ChronoLocal::rfc_3339())
        .with_filter(console_filter);

    let Some(path) = debug_log else {
        tracing_subscriber::registry()
            .with(console)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(None);
    };

    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("Debug log path {} has no file name", path.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
    let file = fmt::layer()
        .with_ansi(false)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(writer)
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(Some(guard))
}
