//! Timeout-bounded cancellation context handed to every shutdown step.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::signal::TerminationSignal;

/// Cancellable context shared by all steps of one shutdown cycle.
///
/// The context is cancelled when the shutdown deadline elapses, when the
/// coordinator releases it after every step finished, or when the parent
/// token passed to
/// [`await_shutdown`](crate::ShutdownCoordinator::await_shutdown) is
/// cancelled, whichever comes first. Cancellation is cooperative: steps are
/// expected to watch [`cancelled`](Self::cancelled) and return promptly.
#[derive(Debug, Clone)]
pub struct ShutdownContext {
    token: CancellationToken,
    deadline: Instant,
    signal: TerminationSignal,
}

/// Releases a [`ShutdownContext`] when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard cancels the context immediately"]
pub struct ContextGuard {
    _guard: DropGuard,
}

impl ContextGuard {
    /// Cancel the context now.
    pub fn release(self) {
        drop(self);
    }
}

impl ShutdownContext {
    /// Derive a context from `parent` that is cancelled after `timeout`.
    ///
    /// Must be called from within a Tokio runtime; the deadline timer runs
    /// as a background task that ends as soon as the context is cancelled.
    pub fn with_timeout(
        parent: &CancellationToken,
        timeout: Duration,
        signal: TerminationSignal,
    ) -> (Self, ContextGuard) {
        let token = parent.child_token();
        let deadline = Instant::now() + timeout;

        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    debug!(timeout_ms = timeout.as_millis(), "shutdown context deadline reached");
                    timer.cancel();
                }
                () = timer.cancelled() => {}
            }
        });

        let guard = ContextGuard {
            _guard: token.clone().drop_guard(),
        };
        (
            Self {
                token,
                deadline,
                signal,
            },
            guard,
        )
    }

    /// Wait until the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Check whether the context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `fut` until it completes or the context is cancelled.
    ///
    /// Returns `None` if cancellation won.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// Point in time at which the context is cancelled.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Get the remaining time before the deadline.
    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        (!remaining.is_zero() && !self.is_cancelled()).then_some(remaining)
    }

    /// The termination event that started this cycle.
    #[must_use]
    pub const fn signal(&self) -> TerminationSignal {
        self.signal
    }

    /// The underlying token, for wiring into code that speaks `tokio-util`.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_at_deadline() {
        let parent = CancellationToken::new();
        let (ctx, _guard) =
            ShutdownContext::with_timeout(&parent, Duration::from_secs(3), TerminationSignal::Manual);

        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.signal(), TerminationSignal::Manual);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!ctx.is_cancelled());
        assert!(ctx.time_remaining().is_some());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(ctx.is_cancelled());
        assert!(ctx.time_remaining().is_none());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_release_cancels_context() {
        let parent = CancellationToken::new();
        let (ctx, guard) =
            ShutdownContext::with_timeout(&parent, Duration::from_secs(60), TerminationSignal::Terminate);
        let observer = ctx.clone();

        guard.release();
        assert!(ctx.is_cancelled());
        assert!(observer.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let (ctx, _guard) =
            ShutdownContext::with_timeout(&parent, Duration::from_secs(60), TerminationSignal::Interrupt);

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(5), ctx.cancelled())
            .await
            .expect("context should follow its parent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancelled() {
        let parent = CancellationToken::new();
        let (ctx, _guard) =
            ShutdownContext::with_timeout(&parent, Duration::from_secs(1), TerminationSignal::Manual);

        let quick = ctx.run_until_cancelled(async { 7 }).await;
        assert_eq!(quick, Some(7));

        let slow = ctx
            .run_until_cancelled(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(slow.is_none());
    }
}
