//! Multi-layer tracing setup: rotating text and JSON log files plus a compact
//! stdout layer, all filtered by `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const TEXT_LOG_FILE: &str = "crawler.log";
pub const JSON_LOG_FILE: &str = "crawler.json.log";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to create log directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Flush handles for the background log writers. Dropping them stops file logging,
/// so hold on to this until the process exits.
#[must_use = "dropping the guards stops file logging"]
pub struct LogGuards {
    _text: WorkerGuard,
    _json: WorkerGuard,
}

/// Initialize the tracing subscriber.
///
/// Creates two daily-rotated files under `log_dir`:
/// 1. `crawler.log` - human-readable text, ANSI colors disabled
/// 2. `crawler.json.log` - structured JSON with span context
///
/// # Environment Variables
/// * `RUST_LOG` - log level filtering, e.g. `RUST_LOG=rust_crawler=debug,reqwest=warn`
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<LogGuards, LoggingError> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path).map_err(|source| LoggingError::CreateDir {
        path: log_path.to_path_buf(),
        source,
    })?;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info")?,
    };

    let text_file_appender = tracing_appender::rolling::daily(log_path, TEXT_LOG_FILE);
    let (text_writer, text_guard) = tracing_appender::non_blocking(text_file_appender);

    let json_file_appender = tracing_appender::rolling::daily(log_path, JSON_LOG_FILE);
    let (json_writer, json_guard) = tracing_appender::non_blocking(json_file_appender);

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter.clone());

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(env_filter.clone());

    // Terminal output stays terse
    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .try_init()?;

    tracing::info!("Logging initialized - logs will be written to {}", log_path.display());

    Ok(LogGuards {
        _text: text_guard,
        _json: json_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // The global subscriber can only be installed once per process, so this is
    // the only test that calls init_logging.
    #[test]
    fn test_logging_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs");

        let guards = init_logging(&log_path).unwrap();
        assert!(log_path.is_dir());

        assert!(matches!(init_logging(&log_path), Err(LoggingError::Init(_))));
        drop(guards);
    }

    #[test]
    fn test_log_dir_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not_a_dir");
        std::fs::write(&file, "x").unwrap();

        assert!(matches!(
            init_logging(file.join("logs")),
            Err(LoggingError::CreateDir { .. })
        ));
    }
}
