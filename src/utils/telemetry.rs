//! Observability
//!
//! Installs the process-wide tracing subscriber: a human-readable stderr
//! layer, plus an optional daily rolling file written off-thread.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::LoggingSettings;

const DEFAULT_FILTER: &str = "ops_agency=info";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("cannot create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global tracing subscriber is already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the file writer flushing until dropped.
#[must_use]
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
}

type FileLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub fn init_telemetry(settings: &LoggingSettings) -> Result<TelemetryGuard, TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let mut worker = None;
    let file_layer: Option<FileLayer> = match &settings.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| TelemetryError::LogDir {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, &settings.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            worker = Some(guard);

            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            Some(if settings.json { layer.json().boxed() } else { layer.boxed() })
        }
        None => None,
    };

    Registry::default()
        .with(file_layer)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;

    Ok(TelemetryGuard { _file: worker })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_layer_writes_under_directory() {
        let dir = tempdir().unwrap();
        let settings = LoggingSettings {
            directory: Some(dir.path().join("logs")),
            file_prefix: "agency-test.log".to_string(),
            json: true,
        };

        let guard = init_telemetry(&settings).unwrap();
        tracing::info!(service = "linear", "telemetry online");
        drop(guard);

        let names: Vec<String> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("agency-test.log")));

        // Only one subscriber per process.
        assert!(matches!(init_telemetry(&LoggingSettings::default()), Err(TelemetryError::Init(_))));
    }
}
