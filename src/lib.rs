#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
//! # shutdown-coordinator: Signal-Triggered Graceful Shutdown
//!
//! Register named cleanup steps, wait for a termination signal, then run
//! every step concurrently under one global deadline. If the steps overrun
//! the deadline, a watchdog logs a fatal event and terminates the process.
//!
//! ## Key Features
//!
//! - **Concurrent Steps**: Every step starts at once; the slowest one bounds the cycle
//! - **Global Deadline**: Steps share a cancellable context that expires with the timeout
//! - **Forced Exit**: A runtime-independent watchdog terminates the process on overrun
//! - **Step Isolation**: Failures and panics are logged per step and never stop the others
//! - **Cross-Platform Signals**: SIGINT, SIGTERM, SIGHUP (and optionally SIGQUIT) or Windows console events
//! - **Configuration**: Layered defaults, TOML file and environment overrides
//! - **Structured Logging**: `tracing` events with step names and timings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shutdown_coordinator::{ShutdownCoordinator, Result};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(10));
//!
//!     shutdown
//!         .add_step("cleanup-cache", |_ctx| async {
//!             tokio::time::sleep(Duration::from_secs(1)).await;
//!             Ok(())
//!         })
//!         .add_step("flush-metrics", |ctx| async move {
//!             ctx.run_until_cancelled(tokio::time::sleep(Duration::from_secs(2)))
//!                 .await;
//!             Ok(())
//!         });
//!
//!     let done = shutdown.await_shutdown(CancellationToken::new());
//!     // ... serve traffic until a signal arrives ...
//!     done.await?;
//!     tracing::info!("graceful shutdown complete");
//!     Ok(())
//! }
//! ```

// Private modules
mod context;
mod coordinator;
mod error;
mod state;
mod step;
mod watchdog;

// Public modules
pub mod config;
pub mod coord;
pub mod logging;
pub mod signal;

// Public exports
pub use config::{Config, ConfigBuilder, LogConfig, LogLevel};
pub use context::{ContextGuard, ShutdownContext};
pub use coordinator::{CoordinatorBuilder, ShutdownCoordinator};
pub use error::{Error, ErrorCode, Result};
pub use signal::{
    manual, ManualSource, OsSignals, ShutdownTrigger, SignalConfig, TerminationSignal,
    TerminationSource,
};
pub use state::{Completion, ShutdownState};
pub use step::{Cleanup, ShutdownStep, StepFuture};
pub use watchdog::{process_exit, ExitHook, RecordingExit};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default global shutdown deadline in milliseconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Default process exit code on forced exit
pub const DEFAULT_EXIT_CODE: i32 = 1;

/// Default coordinator name
pub const DEFAULT_NAME: &str = "shutdown";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "shutdown.toml";
