//! Deadline watchdog that force-terminates the process.
//!
//! The watchdog waits on its own OS thread rather than a runtime task, so
//! steps that block every worker thread cannot keep it from firing. If the
//! thread cannot be spawned, a runtime timer task enforces the deadline
//! instead. When the deadline passes before it is disarmed, it logs the
//! steps that are still pending and calls the [`ExitHook`].

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, warn, Dispatch};

use crate::coord::chan;
use crate::error::{Error, Result};
use crate::state::{ShutdownState, StateCell};

/// Process-terminate capability invoked with the exit code on forced exit.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

/// The default hook: `std::process::exit`.
#[must_use]
pub fn process_exit() -> ExitHook {
    Arc::new(|code| std::process::exit(code))
}

/// Exit hook double that records invocations instead of exiting.
///
/// Useful in tests that exercise the forced-exit path without killing the
/// test process.
#[derive(Debug, Clone, Default)]
pub struct RecordingExit {
    calls: Arc<Mutex<Vec<i32>>>,
}

impl RecordingExit {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook to hand to the coordinator.
    #[must_use]
    pub fn hook(&self) -> ExitHook {
        let calls = Arc::clone(&self.calls);
        Arc::new(move |code| calls.lock().push(code))
    }

    /// Exit codes recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<i32> {
        self.calls.lock().clone()
    }

    /// Whether the hook fired at least once.
    #[must_use]
    pub fn was_called(&self) -> bool {
        !self.calls.lock().is_empty()
    }
}

/// Steps that have been launched but not finished, keyed by launch index.
pub(crate) type PendingSteps = Arc<DashMap<usize, String>>;

/// Everything the watchdog needs when it fires.
#[derive(Clone)]
pub(crate) struct WatchdogParams {
    pub(crate) timeout: Duration,
    pub(crate) exit_code: i32,
    pub(crate) exit_hook: ExitHook,
    pub(crate) pending: PendingSteps,
    pub(crate) state: Arc<StateCell>,
    pub(crate) dispatch: Dispatch,
}

impl WatchdogParams {
    fn fire(&self) {
        if !self.state.advance(ShutdownState::ForcedExit) {
            debug!(state = %self.state.current(), "shutdown finished at the deadline, watchdog stands down");
            return;
        }
        // Completion waiters stay parked until the hook returned or unwound.
        let _settle = SettleOnDrop(&self.state);

        let mut still_running: Vec<String> =
            self.pending.iter().map(|entry| entry.value().clone()).collect();
        still_running.sort();

        error!(
            severity = "fatal",
            timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            exit_code = self.exit_code,
            pending = ?still_running,
            "graceful shutdown timed out, forcing exit"
        );
        (self.exit_hook)(self.exit_code);
    }
}

struct SettleOnDrop<'a>(&'a StateCell);

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.settle();
    }
}

#[derive(Debug)]
enum Backend {
    Thread(chan::Sender<()>),
    Task(AbortHandle),
}

/// Armed watchdog. Disarm it once every step finished.
#[derive(Debug)]
pub(crate) struct Watchdog {
    backend: Option<Backend>,
}

impl Watchdog {
    /// Start the watchdog on its own thread, or on a runtime timer task if
    /// the thread cannot be spawned. Must be called from within a Tokio
    /// runtime.
    pub(crate) fn arm(params: WatchdogParams) -> Self {
        let fallback = params.clone();
        match Self::on_thread(params) {
            Ok(watchdog) => watchdog,
            Err(e) => {
                warn!(error = %e, "watchdog thread unavailable, enforcing the deadline from a runtime task");
                Self::on_runtime(fallback)
            }
        }
    }

    fn on_thread(params: WatchdogParams) -> Result<Self> {
        let (tx, rx) = chan::unbounded::<()>();

        thread::Builder::new()
            .name("shutdown-watchdog".into())
            .spawn(move || {
                tracing::dispatcher::with_default(&params.dispatch, || {
                    match chan::recv_timeout(&rx, params.timeout) {
                        Err(chan::RecvTimeoutError::Timeout) => params.fire(),
                        Ok(()) | Err(chan::RecvTimeoutError::Disconnected) => {
                            debug!("shutdown watchdog disarmed");
                        }
                    }
                });
            })
            .map_err(|e| Error::io_with_source("Failed to spawn shutdown watchdog thread", e))?;

        Ok(Self {
            backend: Some(Backend::Thread(tx)),
        })
    }

    fn on_runtime(params: WatchdogParams) -> Self {
        let dispatch = params.dispatch.clone();
        let task = tokio::spawn(
            async move {
                tokio::time::sleep(params.timeout).await;
                params.fire();
            }
            .with_subscriber(dispatch),
        );

        Self {
            backend: Some(Backend::Task(task.abort_handle())),
        }
    }

    /// Stop the watchdog without firing.
    pub(crate) fn disarm(mut self) {
        match self.backend.take() {
            Some(Backend::Thread(tx)) => {
                let _ = tx.send(());
            }
            Some(Backend::Task(handle)) => handle.abort(),
            None => {}
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // A dropped sender disconnects the channel, which also disarms.
        if let Some(Backend::Task(handle)) = self.backend.take() {
            handle.abort();
        }
    }
}
