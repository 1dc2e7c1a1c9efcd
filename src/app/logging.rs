//! Usage: Process-wide tracing setup (stdout + optional non-blocking log file).

use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Keeps the file writer flushing until dropped at process exit.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn split_log_path(path: &Path) -> Option<(&Path, &std::ffi::OsStr)> {
    let file_name = path.file_name()?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some((dir, file_name))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init(log_file: Option<&Path>) -> LoggingGuard {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let (file_writer, guard) = match log_file.and_then(split_log_path) {
        Some((dir, file_name)) => {
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact())
        .with(file_layer);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_log::LogTracer::init();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    if let Some(path) = log_file {
        tracing::info!(path = %path.display(), "file logging enabled");
    }

    LoggingGuard { _file: guard }
}
