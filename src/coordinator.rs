//! Signal-triggered shutdown coordination.
//!
//! The [`ShutdownCoordinator`] collects named cleanup steps before shutdown
//! and runs them all concurrently once a termination signal arrives. One
//! global deadline bounds the whole batch: steps observe it through their
//! [`ShutdownContext`], and a watchdog terminates the process if the batch
//! overruns it.
//!
//! ```rust,no_run
//! use shutdown_coordinator::ShutdownCoordinator;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> shutdown_coordinator::Result<()> {
//!     let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(10));
//!
//!     shutdown.add_step("flush-metrics", |ctx| async move {
//!         ctx.run_until_cancelled(tokio::time::sleep(Duration::from_secs(2))).await;
//!         Ok(())
//!     });
//!
//!     shutdown.await_shutdown(CancellationToken::new()).await
//! }
//! ```

use dashmap::DashMap;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Dispatch, Instrument};

use crate::config::Config;
use crate::context::ShutdownContext;
use crate::error::Error;
use crate::signal::{OsSignals, SignalConfig, TerminationSource};
use crate::state::{Completion, ShutdownState, StateCell};
use crate::step::{Cleanup, ShutdownStep, StepFn};
use crate::watchdog::{process_exit, ExitHook, PendingSteps, Watchdog, WatchdogParams};

/// Coordinates a single graceful shutdown cycle.
///
/// Register every step first, then hand the coordinator to
/// [`await_shutdown`](Self::await_shutdown). Since that call consumes the
/// coordinator, the registry is frozen before any step can run.
pub struct ShutdownCoordinator {
    name: String,
    timeout: Duration,
    exit_code: i32,
    steps: Vec<ShutdownStep>,
    source: Box<dyn TerminationSource>,
    exit_hook: ExitHook,
    dispatch: Dispatch,
}

impl ShutdownCoordinator {
    /// Create a coordinator listening to OS termination signals.
    ///
    /// Logs go to the tracing dispatcher that is current at construction.
    /// `timeout` should be non-zero; it is not validated here.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::builder().timeout(timeout).build()
    }

    /// Create a builder with default settings.
    #[must_use]
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Create a builder pre-filled from a validated [`Config`].
    #[must_use]
    pub fn from_config(config: &Config) -> CoordinatorBuilder {
        CoordinatorBuilder::new()
            .name(config.name.clone())
            .timeout(config.shutdown_timeout())
            .exit_code(config.shutdown.exit_code)
            .signals(config.signals)
    }

    /// Register a cleanup step.
    pub fn add_step<S, F, Fut>(&mut self, name: S, action: F) -> &mut Self
    where
        S: Into<String>,
        F: FnOnce(ShutdownContext) -> Fut + Send + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        self.push(ShutdownStep::new(name, action))
    }

    /// Register a struct-based cleanup step.
    pub fn add<C: Cleanup>(&mut self, cleanup: C) -> &mut Self {
        self.push(ShutdownStep::from_cleanup(cleanup))
    }

    fn push(&mut self, step: ShutdownStep) -> &mut Self {
        debug!(step = %step.name(), "registered shutdown step");
        self.steps.push(step);
        self
    }

    /// Number of registered steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Names of registered steps in registration order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(ShutdownStep::name)
    }

    /// The global shutdown deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for a termination signal on a background task, then run every
    /// registered step.
    ///
    /// Returns immediately with a [`Completion`] that fires once all steps
    /// finished. `parent` bounds the context steps receive: cancelling it
    /// cancels their context early. If the deadline passes first, the
    /// process is terminated through the exit hook and the completion never
    /// fires.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn await_shutdown(self, parent: CancellationToken) -> Completion {
        let state = Arc::new(StateCell::new());
        let completion = Completion::new(state.subscribe(), self.timeout);

        let dispatch = self.dispatch.clone();
        // The span must belong to the subscriber that will enter it.
        let span = tracing::dispatcher::with_default(&dispatch, || {
            info_span!("shutdown", coordinator = %self.name)
        });

        tokio::spawn(self.run(parent, state).instrument(span).with_subscriber(dispatch));
        completion
    }

    async fn run(self, parent: CancellationToken, state: Arc<StateCell>) {
        let Self {
            timeout,
            exit_code,
            steps,
            mut source,
            exit_hook,
            ..
        } = self;

        debug!(
            steps = steps.len(),
            timeout_ms = millis(timeout),
            "waiting for termination signal"
        );

        let signal = match source.recv().await {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "termination source failed, shutdown will not run");
                return;
            }
        };
        let started = Instant::now();
        state.advance(ShutdownState::SignalReceived);
        info!(%signal, "shutdown signal received, starting graceful shutdown");

        let (ctx, release) = ShutdownContext::with_timeout(&parent, timeout, signal);

        let pending: PendingSteps = Arc::new(DashMap::with_capacity(steps.len()));
        for (idx, step) in steps.iter().enumerate() {
            pending.insert(idx, step.name().to_owned());
        }

        let watchdog = Watchdog::arm(WatchdogParams {
            timeout,
            exit_code,
            exit_hook,
            pending: Arc::clone(&pending),
            state: Arc::clone(&state),
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
        });

        let drained = CancellationToken::new();
        tokio::spawn(
            ignore_further_signals(source, drained.clone())
                .in_current_span()
                .with_current_subscriber(),
        );

        state.advance(ShutdownState::StepsRunning);
        let total = steps.len();
        let launched: Vec<_> = steps
            .into_iter()
            .enumerate()
            .map(|(idx, step)| {
                let (name, action) = step.into_parts();
                let guard = PendingGuard {
                    pending: Arc::clone(&pending),
                    idx,
                };
                let task = tokio::spawn(
                    run_step(name.clone(), action, ctx.clone(), guard)
                        .in_current_span()
                        .with_current_subscriber(),
                );
                (name, task)
            })
            .collect();

        let outcomes = join_all(launched.into_iter().map(|(name, task)| async move {
            match task.await {
                Ok(succeeded) => succeeded,
                Err(join_err) => {
                    let err = join_failure(&name, &join_err);
                    error!(step = %name, error = %err, "shutdown step failed");
                    false
                }
            }
        }))
        .await;
        let failed = outcomes.iter().filter(|succeeded| !**succeeded).count();

        drained.cancel();
        watchdog.disarm();
        release.release();

        if state.advance(ShutdownState::Completed) {
            info!(
                steps = total,
                failed,
                elapsed_ms = millis(started.elapsed()),
                "graceful shutdown complete"
            );
        } else {
            warn!(
                steps = total,
                failed,
                elapsed_ms = millis(started.elapsed()),
                "steps finished after the forced-exit deadline"
            );
        }
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("exit_code", &self.exit_code)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// Removes a step from the pending set when its task ends, panics included.
struct PendingGuard {
    pending: PendingSteps,
    idx: usize,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.idx);
    }
}

async fn run_step(name: String, action: StepFn, ctx: ShutdownContext, _guard: PendingGuard) -> bool {
    info!(step = %name, "executing shutdown step");
    let started = Instant::now();

    match action(ctx).await {
        Ok(()) => {
            info!(step = %name, elapsed_ms = millis(started.elapsed()), "shutdown step completed");
            true
        }
        Err(e) => {
            error!(
                step = %name,
                error = %e,
                elapsed_ms = millis(started.elapsed()),
                "shutdown step failed"
            );
            false
        }
    }
}

/// Keep consuming termination events while steps run so that repeated
/// signals are reported instead of silently swallowed.
async fn ignore_further_signals(mut source: Box<dyn TerminationSource>, done: CancellationToken) {
    loop {
        tokio::select! {
            () = done.cancelled() => break,
            received = source.recv() => match received {
                Ok(signal) => warn!(%signal, "shutdown already in progress, ignoring signal"),
                Err(e) => {
                    debug!(error = %e, "termination source closed during shutdown");
                    break;
                }
            },
        }
    }
}

/// A step task that did not return: either it panicked or the runtime
/// cancelled it.
fn join_failure(name: &str, join_err: &JoinError) -> Error {
    if join_err.is_panic() {
        Error::step_panicked(name, join_err.to_string())
    } else {
        Error::step(name, "task cancelled before finishing")
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`ShutdownCoordinator`].
pub struct CoordinatorBuilder {
    name: String,
    timeout: Duration,
    exit_code: i32,
    signals: SignalConfig,
    source: Option<Box<dyn TerminationSource>>,
    exit_hook: Option<ExitHook>,
    dispatch: Option<Dispatch>,
}

impl CoordinatorBuilder {
    /// Create a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: crate::DEFAULT_NAME.to_string(),
            timeout: Duration::from_millis(crate::DEFAULT_SHUTDOWN_TIMEOUT_MS),
            exit_code: crate::DEFAULT_EXIT_CODE,
            signals: SignalConfig::default(),
            source: None,
            exit_hook: None,
            dispatch: None,
        }
    }

    /// Name recorded on the `shutdown` span.
    #[must_use]
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Global deadline for all steps.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Exit code used on forced exit.
    #[must_use]
    pub const fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// OS signals to listen for. Ignored when a custom source is set.
    #[must_use]
    pub const fn signals(mut self, signals: SignalConfig) -> Self {
        self.signals = signals;
        self
    }

    /// Replace the OS signal source, e.g. with a [`ManualSource`](crate::signal::ManualSource).
    #[must_use]
    pub fn source<T: TerminationSource>(mut self, source: T) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace the process-exit capability.
    #[must_use]
    pub fn exit_hook(mut self, hook: ExitHook) -> Self {
        self.exit_hook = Some(hook);
        self
    }

    /// Log sink for every event of the cycle. Defaults to the dispatcher
    /// current when [`build`](Self::build) runs.
    #[must_use]
    pub fn dispatch<D: Into<Dispatch>>(mut self, dispatch: D) -> Self {
        self.dispatch = Some(dispatch.into());
        self
    }

    /// Build the coordinator.
    #[must_use]
    pub fn build(self) -> ShutdownCoordinator {
        let signals = self.signals;
        ShutdownCoordinator {
            name: self.name,
            timeout: self.timeout,
            exit_code: self.exit_code,
            steps: Vec::new(),
            source: self
                .source
                .unwrap_or_else(|| Box::new(OsSignals::new(signals))),
            exit_hook: self.exit_hook.unwrap_or_else(process_exit),
            dispatch: self
                .dispatch
                .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone)),
        }
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
