//! Configuration management for the shutdown coordinator.
//!
//! Settings are layered with figment, lowest precedence first:
//! 1. Default values
//! 2. Configuration file (TOML, if present)
//! 3. Environment variables prefixed with `GRACEFUL_`, nested with `__`
//!    (e.g. `GRACEFUL_SHUTDOWN__TIMEOUT_MS=3000`)
//! 4. An explicit provider passed to [`Config::load_with_provider`]

#[cfg(feature = "toml")]
use figment::providers::Format;
use figment::providers::{Env, Serialized};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::signal::SignalConfig;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GRACEFUL_";

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level logging (most verbose)
    Trace,
    /// Debug level logging
    Debug,
    /// Info level logging (default)
    #[default]
    Info,
    /// Warning level logging
    Warn,
    /// Error level logging
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level
    pub level: LogLevel,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Enable colored output (ignored for JSON logs and files)
    pub color: bool,
    /// Append logs to this file instead of stdout
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Whether output gets ANSI colors. Only plain stdout output does.
    #[must_use]
    pub const fn is_colored(&self) -> bool {
        self.color && !self.json && self.file.is_none()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            color: true,
            file: None,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Global deadline for all steps, in milliseconds
    pub timeout_ms: u64,
    /// Process exit code used when the deadline forces an exit
    pub exit_code: i32,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: crate::DEFAULT_SHUTDOWN_TIMEOUT_MS,
            exit_code: crate::DEFAULT_EXIT_CODE,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator name, recorded on the shutdown span
    pub name: String,
    /// Logging configuration
    pub logging: LogConfig,
    /// Shutdown configuration
    pub shutdown: ShutdownConfig,
    /// Termination signals to listen for
    pub signals: SignalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::from(crate::DEFAULT_NAME),
            logging: LogConfig::default(),
            shutdown: ShutdownConfig::default(),
            signals: SignalConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default file location, the environment
    /// and defaults.
    ///
    /// # Errors
    ///
    /// Will return an error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load() -> Result<Self> {
        Self::load_from_file(crate::DEFAULT_CONFIG_FILE)
    }

    /// Load config from a file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Will return an error if the file contains invalid configuration data.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if path.exists() {
            #[cfg(feature = "toml")]
            {
                figment = figment.merge(figment::providers::Toml::file(path));
            }

            #[cfg(not(feature = "toml"))]
            {
                return Err(Error::config(format!(
                    "Config file {} found but the `toml` feature is disabled",
                    path.display()
                )));
            }
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config using an additional provider with the highest precedence.
    ///
    /// # Errors
    ///
    /// Will return an error if the provider fails to load a valid configuration.
    pub fn load_with_provider<P: Provider>(provider: P) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(provider)
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the shutdown timeout as a Duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown.timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.shutdown.timeout_ms == 0 {
            return Err(Error::config("Shutdown timeout must be greater than 0"));
        }

        if self.shutdown.exit_code == 0 {
            return Err(Error::config("Forced-exit code must be non-zero"));
        }

        if self.name.is_empty() {
            return Err(Error::config("Coordinator name cannot be empty"));
        }

        if self.signals.enabled().is_empty() {
            return Err(Error::config("At least one termination signal must be enabled"));
        }

        if let Some(parent) = self.logging.file.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(Error::config(format!(
                    "Log file directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        Ok(())
    }

    /// Create a builder for this configuration.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for creating configurations programmatically.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coordinator name.
    #[must_use]
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the log level.
    #[must_use]
    pub const fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Enable JSON logging.
    #[must_use]
    pub const fn json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    /// Write logs to a file.
    #[must_use]
    pub fn log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.logging.file = Some(path.into());
        self
    }

    /// Set the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Will return an error if the duration exceeds `u64::MAX` milliseconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.config.shutdown.timeout_ms = u64::try_from(timeout.as_millis())
            .map_err(|_| Error::config("Shutdown timeout too large"))?;
        Ok(self)
    }

    /// Set the forced-exit code.
    #[must_use]
    pub const fn exit_code(mut self, code: i32) -> Self {
        self.config.shutdown.exit_code = code;
        self
    }

    /// Set which signals start a shutdown.
    #[must_use]
    pub const fn signals(mut self, signals: SignalConfig) -> Self {
        self.config.signals = signals;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if validation fails.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
