//! Logging setup built on `tracing-subscriber`.
//!
//! Applications that do not bring their own subscriber can call [`init`]
//! once at startup. [`dispatch`] builds the same subscriber without
//! installing it, which is what a coordinator's log sink takes.

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::Dispatch;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LogConfig;
use crate::error::{Error, Result};

/// Build a subscriber for `config` without installing it.
///
/// `RUST_LOG` directives are honored on top of the configured level.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened, or if JSON output is
/// requested without the `json-logs` feature.
pub fn dispatch(config: &LogConfig) -> Result<Dispatch> {
    let level: tracing::Level = config.level.into();
    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::from_level(level).into());

    let writer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    Error::io_with_source(
                        format!("Failed to open log file at {}", path.display()),
                        e,
                    )
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(writer);

    if config.json {
        #[cfg(feature = "json-logs")]
        {
            let subscriber = builder
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .finish();
            return Ok(Dispatch::new(subscriber));
        }

        #[cfg(not(feature = "json-logs"))]
        {
            return Err(Error::config(
                "JSON logging requested but the `json-logs` feature is not enabled",
            ));
        }
    }

    Ok(Dispatch::new(builder.with_ansi(config.is_colored()).compact().finish()))
}

/// Build and install the global subscriber.
///
/// # Errors
///
/// Returns an error if the subscriber cannot be built or a global
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let dispatch = dispatch(config)?;
    tracing::dispatcher::set_global_default(dispatch)
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {e}")))?;
    tracing::debug!(level = ?config.level, "logging initialized");
    Ok(())
}
