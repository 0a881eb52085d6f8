//! Formatting layers and writers
//!
//! Every layer is boxed against the bare [`Registry`] so the builder can
//! assemble any combination of console and file output without a match arm
//! per combination.

use std::fs::{self, File};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::LoggingError;
use crate::config::{ConsoleConfig, ConsoleTarget, FileConfig, JsonlConfig, RotationStrategy};

/// A type-erased layer over the base registry
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// JSONL formatting layer
pub fn jsonl_layer<W>(writer: W, config: &JsonlConfig) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(config.include_current_span)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
        .boxed()
}

/// Human-readable formatting layer
pub fn pretty_layer<W>(writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(writer)
        .boxed()
}

/// Console layer, optionally with its own level
pub fn console_layer(config: &ConsoleConfig, jsonl: &JsonlConfig) -> Result<BoxedLayer, LoggingError> {
    let writer = match config.target {
        ConsoleTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        ConsoleTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let layer = if config.pretty {
        pretty_layer(writer, config.ansi)
    } else {
        jsonl_layer(writer, jsonl)
    };

    match &config.level {
        Some(level) => {
            let filter = parse_filter(level)?;
            Ok(layer.with_filter(filter).boxed())
        }
        None => Ok(layer),
    }
}

/// Non-blocking writer for file output
///
/// `Never` truncates a single `<prefix>.log`; the rotating strategies append
/// to dated files and prune beyond `max_files`.
pub fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory).map_err(|source| LoggingError::LogDirectory {
        path: config.directory.clone(),
        source,
    })?;

    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            let file = File::create(&path).map_err(|source| LoggingError::LogFile { path, source })?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.clone())
        .filename_suffix("log");
    if let Some(max) = config.max_files {
        builder = builder.max_log_files(max);
    }
    let appender = builder.build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Parse a level or directive list such as `info,rill_streams=debug`
pub fn parse_filter(directives: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidFilter {
        directives: directives.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_never_rotation_creates_single_file() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig {
            directory: dir.path().join("nested"),
            prefix: "tail".to_string(),
            rotation: RotationStrategy::Never,
            max_files: None,
        };

        let (_writer, _guard) = file_writer(&config).unwrap();
        assert!(dir.path().join("nested").join("tail.log").exists());
    }

    #[test]
    fn test_rotating_writer_creates_directory() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig {
            directory: dir.path().join("daily"),
            ..FileConfig::default()
        };

        let (_writer, _guard) = file_writer(&config).unwrap();
        assert!(dir.path().join("daily").is_dir());
    }

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter("info,rill_streams=debug").is_ok());
        let err = parse_filter("rill_streams=loud").unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter { .. }));
    }

    #[test]
    fn test_console_layer_rejects_bad_level() {
        let config = ConsoleConfig {
            level: Some("rill=loud".to_string()),
            ..ConsoleConfig::default()
        };
        assert!(console_layer(&config, &JsonlConfig::default()).is_err());
    }
}
