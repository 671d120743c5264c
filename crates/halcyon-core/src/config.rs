/*!
 * Configuration management for Halcyon.
 *
 * Settings are layered: built-in defaults, then an optional configuration
 * file, then prefixed environment variables (`HALCYON__HANDLER__CALL_TIMEOUT_MS`).
 */
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::utils::millis_to_duration;

/// Top-level configuration for a Halcyon process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Device handler configuration
    #[serde(default)]
    pub handler: HandlerConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter directive (e.g. "info", "halcyon_handler=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to print the event target
    #[serde(default = "default_true")]
    pub with_target: bool,
}

/// What a handler does when its data callback asks to disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDisconnectPolicy {
    /// Run the disconnect protocol and return to the disconnected state
    #[default]
    Honor,
    /// Keep the connection; only the returned state is stored
    Ignore,
}

/// Device handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Upper bound for adapter start, connect, send and stop requests
    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,

    /// Default timeout for synchronous calls into a handler
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Capacity of a handler's request mailbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Capacity of each subsystem's directory event channel
    #[serde(default = "default_directory_capacity")]
    pub directory_capacity: usize,

    /// Behaviour of a `Disconnect` outcome returned from the data callback
    #[serde(default)]
    pub data_disconnect: DataDisconnectPolicy,
}

impl HandlerConfig {
    /// Adapter request timeout as a duration
    pub fn adapter_timeout(&self) -> Duration {
        millis_to_duration(self.adapter_timeout_ms)
    }

    /// Call timeout as a duration
    pub fn call_timeout(&self) -> Duration {
        millis_to_duration(self.call_timeout_ms)
    }

    /// Check the values that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        if self.adapter_timeout_ms == 0 {
            return Err(Error::config("handler.adapter_timeout_ms must be greater than zero"));
        }
        if self.mailbox_capacity == 0 {
            return Err(Error::config("handler.mailbox_capacity must be greater than zero"));
        }
        if self.directory_capacity == 0 {
            return Err(Error::config("handler.directory_capacity must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: default_adapter_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            mailbox_capacity: default_mailbox_capacity(),
            directory_capacity: default_directory_capacity(),
            data_disconnect: DataDisconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn default_app_name() -> String {
    "halcyon".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_adapter_timeout_ms() -> u64 {
    5_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_directory_capacity() -> usize {
    256
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<PathBuf>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        let defaults = ConfigLib::try_from(&Config::default())
            .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?;
        let mut builder = ConfigLib::builder().add_source(defaults);

        if let Some(path) = self.config_file {
            if path.exists() {
                debug!("Loading configuration from {}", path.display());
                builder = builder.add_source(File::from(path));
            } else {
                debug!("Configuration file {} does not exist, using defaults", path.display());
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            builder = builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        config.handler.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}
