use std::fs;
use std::path::Path;

use anyhow::Context;
use rill_logging::LogConfig;
use rill_redis::RedisConfig;
use rill_streams::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// Everything the `rill` binary can read from its TOML file
///
/// ```toml
/// [redis]
/// address = "localhost:6379"
/// db = 0
///
/// [client]
/// timeout_ms = 5000
/// claim_count = 100
///
/// [logging]
/// default_level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub redis: RedisConfig,
    pub client: ClientConfig,
    pub logging: LogConfig,
}

impl CliConfig {
    /// Parse a configuration file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// File configuration (or defaults) with command-line overrides applied
    pub fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self {
                logging: LogConfig {
                    default_level: "warn".to_string(),
                    ..LogConfig::default()
                },
                ..Self::default()
            },
        };

        if let Some(address) = &cli.address {
            config.redis.address = address.clone();
        }
        if let Some(level) = &cli.log_level {
            config.logging.default_level = level.clone();
        }
        if cli.pretty {
            config.logging.console.pretty = true;
        }
        Ok(config)
    }
}
