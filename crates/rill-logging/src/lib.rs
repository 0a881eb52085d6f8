//! Structured logging for rill services and tools
//!
//! Console output is JSONL by default and goes to stderr, leaving stdout to
//! command output. File output is always JSONL and rotates via
//! tracing-appender. `RUST_LOG` overrides the configured default level.
//!
//! # Quick Start
//!
//! ```ignore
//! use rill_logging::{LogConfig, RillSubscriberBuilder};
//!
//! // Keep the guard alive for as long as file output is needed
//! let _guard = RillSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .try_init()?;
//!
//! tracing::info!(stream = "orders", "Consumer started");
//! ```

pub mod config;
pub mod layers;

pub use config::{
    ConsoleConfig, ConsoleTarget, FileConfig, JsonlConfig, LogConfig, RotationStrategy,
};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::path::PathBuf;

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::layers::BoxedLayer;

/// Errors raised while setting up logging
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directives}': {message}")]
    InvalidFilter { directives: String, message: String },

    #[error("failed to create log directory {}: {source}", path.display())]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up rolling log files: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("a global subscriber is already set: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Builder for configuring and initializing the rill logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
#[derive(Debug, Clone, Default)]
pub struct RillSubscriberBuilder {
    config: LogConfig,
}

impl RillSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// The configuration that will be applied
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Global filter: `RUST_LOG` when set, the configured level otherwise
    fn global_filter(&self) -> Result<EnvFilter, LoggingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => layers::parse_filter(&self.config.default_level),
        }
    }

    /// Build the output layers without installing them
    pub fn build_layers(&self) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LoggingError> {
        let mut outputs = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            outputs.push(layers::console_layer(&self.config.console, &self.config.jsonl)?);
        }
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = layers::file_writer(file_config)?;
            outputs.push(layers::jsonl_layer(writer, &self.config.jsonl));
            guard = Some(file_guard);
        }
        Ok((outputs, guard))
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard, if file output is enabled; dropping it
    /// flushes and stops file logging.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = self.global_filter()?;
        let (outputs, guard) = self.build_layers()?;
        Registry::default().with(outputs).with(filter).try_init()?;
        Ok(guard)
    }
}

/// Initialize logging with default settings (JSONL to stderr)
pub fn init_default() -> Result<(), LoggingError> {
    RillSubscriberBuilder::new().try_init().map(|_| ())
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Result<(), LoggingError> {
    RillSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .try_init()
        .map(|_| ())
}

/// Initialize logging for testing (minimal output, repeat calls ignored)
pub fn init_testing() {
    let _ = RillSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_creation() {
        let builder = RillSubscriberBuilder::new();
        assert_eq!(builder.config().default_level, "info");
        assert!(!builder.config().console.pretty); // JSONL by default
    }

    #[test]
    fn test_builder_overrides() {
        let builder = RillSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(false);
        assert_eq!(builder.config().default_level, "trace");
        assert!(!builder.config().console.enabled);
        assert!(builder.config().console.pretty);
    }

    #[test]
    fn test_build_layers_counts_outputs() {
        let (layers, guard) = RillSubscriberBuilder::new().build_layers().unwrap();
        assert_eq!(layers.len(), 1);
        assert!(guard.is_none());

        let dir = TempDir::new().unwrap();
        let (layers, guard) = RillSubscriberBuilder::new()
            .with_console(false)
            .with_file_output(FileConfig {
                directory: dir.path().to_path_buf(),
                rotation: RotationStrategy::Never,
                ..FileConfig::default()
            })
            .build_layers()
            .unwrap();
        assert_eq!(layers.len(), 1);
        assert!(guard.is_some());
        assert!(dir.path().join("rill.log").exists());
    }

    #[test]
    fn test_init_testing_is_repeatable() {
        init_testing();
        init_testing();
        tracing::warn!("logging initialized twice without panicking");
    }
}
