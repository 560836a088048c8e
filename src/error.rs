//! Error handling for the shutdown coordinator.
//!
//! A single [`Error`] type covers every fallible operation in the crate:
//! step outcomes, configuration loading, logging setup and signal
//! subscription. Each variant carries an [`ErrorCode`] so failures can be
//! matched programmatically or grouped in log output.
//!
//! # Usage
//!
//! Step actions return [`Result<()>`](Result). Any failure is logged by the
//! coordinator together with the step name and then discarded:
//!
//! ```no_run
//! use shutdown_coordinator::{Error, Result};
//!
//! async fn flush_queue() -> Result<()> {
//!     let flushed = false;
//!     if !flushed {
//!         return Err(Error::step("flush-queue", "broker unreachable"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! I/O errors convert through `?`:
//!
//! ```no_run
//! use shutdown_coordinator::Result;
//!
//! async fn remove_socket() -> Result<()> {
//!     std::fs::remove_file("/tmp/app.sock")?;
//!     Ok(())
//! }
//! ```

/// Result type alias for coordinator operations and step outcomes.
pub type Result<T> = std::result::Result<T, Error>;

/// Error code enum for categorizing and identifying errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    // Configuration errors: 1000-1999
    /// Configuration value failed validation
    ConfigInvalid = 1000,
    /// Configuration source could not be parsed
    ConfigParse = 1001,

    // Signal handling errors: 2000-2999
    /// Registering an OS signal handler failed
    SignalRegisterFailed = 2000,
    /// The termination source closed before delivering a signal
    SignalSourceClosed = 2001,

    // Step errors: 3000-3999
    /// A shutdown step reported failure
    StepFailed = 3000,
    /// A shutdown step panicked or was aborted
    StepPanicked = 3001,

    // IO errors: 5000-5999
    /// Generic I/O failure
    IoError = 5000,

    // Runtime errors: 6000-6999
    /// Logging or runtime initialisation failed
    RuntimeInit = 6000,

    // Timeout errors: 8000-8999
    /// An operation exceeded its deadline
    TimeoutOperation = 8000,

    // State errors: 9000-9999
    /// The coordinator ended in an unexpected state
    InvalidStateValue = 9000,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), *self as i32)
    }
}

impl ErrorCode {
    /// Convert error code to string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigParse => "CONFIG_PARSE",
            Self::SignalRegisterFailed => "SIGNAL_REGISTER_FAILED",
            Self::SignalSourceClosed => "SIGNAL_SOURCE_CLOSED",
            Self::StepFailed => "STEP_FAILED",
            Self::StepPanicked => "STEP_PANICKED",
            Self::IoError => "IO_ERROR",
            Self::RuntimeInit => "RUNTIME_INIT",
            Self::TimeoutOperation => "TIMEOUT_OPERATION",
            Self::InvalidStateValue => "INVALID_STATE_VALUE",
        }
    }
}

/// Boxed source error carried by every variant.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for all coordinator operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error [{code}]: {message}")]
    Config {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxError>,
    },

    /// Signal subscription errors
    #[error("Signal handling error [{code}]: {message}")]
    Signal {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Signal number if applicable
        signal: Option<i32>,
        /// Optional source error for better context
        #[source]
        source: Option<BoxError>,
    },

    /// Failure reported by a shutdown step
    #[error("Step '{step}' failed [{code}]: {message}")]
    Step {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Name of the step
        step: String,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxError>,
    },

    /// I/O operation errors
    #[error("I/O error [{code}]: {message}")]
    Io {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxError>,
    },

    /// Timeout errors
    #[error("Operation timed out [{code}] after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Invalid state errors
    #[error("Invalid state [{code}]: {message}")]
    InvalidState {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
    },

    /// Runtime errors
    #[error("Runtime error [{code}]: {message}")]
    Runtime {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            code: ErrorCode::ConfigInvalid,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new configuration parse error with its source.
    pub fn config_parse<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Config {
            code: ErrorCode::ConfigParse,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new signal error.
    pub fn signal<S: Into<String>>(message: S) -> Self {
        Self::Signal {
            code: ErrorCode::SignalSourceClosed,
            message: message.into(),
            signal: None,
            source: None,
        }
    }

    /// Create a signal registration error for a specific signal number.
    pub fn signal_register<S: Into<String>>(message: S, signal: i32, source: std::io::Error) -> Self {
        Self::Signal {
            code: ErrorCode::SignalRegisterFailed,
            message: message.into(),
            signal: Some(signal),
            source: Some(Box::new(source)),
        }
    }

    /// Create a step failure.
    pub fn step<S: Into<String>, M: Into<String>>(step: S, message: M) -> Self {
        Self::Step {
            code: ErrorCode::StepFailed,
            step: step.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a step failure wrapping an underlying error.
    pub fn step_with_source<S, M, E>(step: S, message: M, source: E) -> Self
    where
        S: Into<String>,
        M: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Step {
            code: ErrorCode::StepFailed,
            step: step.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a step failure describing a panicked or aborted task.
    pub fn step_panicked<S: Into<String>, M: Into<String>>(step: S, message: M) -> Self {
        Self::Step {
            code: ErrorCode::StepPanicked,
            step: step.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a new I/O error with source error.
    pub fn io_with_source<S: Into<String>>(message: S, source: std::io::Error) -> Self {
        Self::Io {
            code: ErrorCode::IoError,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            code: ErrorCode::TimeoutOperation,
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new invalid state error.
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            code: ErrorCode::InvalidStateValue,
            message: message.into(),
        }
    }

    /// Create a new runtime initialisation error.
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            code: ErrorCode::RuntimeInit,
            message: message.into(),
            source: None,
        }
    }

    /// Get the structured error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config { code, .. }
            | Self::Signal { code, .. }
            | Self::Step { code, .. }
            | Self::Io { code, .. }
            | Self::Timeout { code, .. }
            | Self::InvalidState { code, .. }
            | Self::Runtime { code, .. } => *code,
        }
    }

    /// Check if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is configuration-related.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Get the error category for logging.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Signal { .. } => "signal",
            Self::Step { .. } => "step",
            Self::Io { .. } => "io",
            Self::Timeout { .. } => "timeout",
            Self::InvalidState { .. } => "state",
            Self::Runtime { .. } => "runtime",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_with_source("I/O operation failed", err)
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::config_parse("Configuration loading failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_creation() {
        let err = Error::config("test message");
        assert!(err.is_config_error());
        assert_eq!(err.category(), "config");
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_step_error_display() {
        let err = Error::step("flush-metrics", "sink unavailable");
        assert_eq!(
            err.to_string(),
            "Step 'flush-metrics' failed [STEP_FAILED(3000)]: sink unavailable"
        );
        assert_eq!(err.category(), "step");
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::from(io_err);
        assert_eq!(err.code(), ErrorCode::IoError);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_timeout_error() {
        let err = Error::timeout("graceful shutdown", 5000);
        assert!(err.is_timeout());
        assert_eq!(err.category(), "timeout");
    }
}
