//! Shutdown cycle state and the one-shot completion signal.

use futures::future::BoxFuture;
use std::future::IntoFuture;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Lifecycle of a single shutdown cycle.
///
/// `Idle → SignalReceived → StepsRunning → {Completed | ForcedExit}`.
/// `Completed` and `ForcedExit` are terminal; once either is reached the
/// state never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownState {
    /// Waiting for a termination signal
    Idle,
    /// A signal arrived; the shutdown context is being derived
    SignalReceived,
    /// Steps have been launched and are running
    StepsRunning,
    /// Every step finished before the deadline
    Completed,
    /// The watchdog fired before every step finished
    ForcedExit,
}

impl ShutdownState {
    /// Whether this state ends the cycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::ForcedExit)
    }
}

impl std::fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::SignalReceived => write!(f, "SignalReceived"),
            Self::StepsRunning => write!(f, "StepsRunning"),
            Self::Completed => write!(f, "Completed"),
            Self::ForcedExit => write!(f, "ForcedExit"),
        }
    }
}

/// What waiters observe: the state plus whether it is final.
///
/// `Completed` is settled as soon as it is reached. `ForcedExit` is claimed
/// first and only settled after the fatal event was logged and the exit hook
/// returned, so no waiter wakes up ahead of the exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Snapshot {
    state: ShutdownState,
    settled: bool,
}

impl Snapshot {
    const fn resolved(self) -> bool {
        self.settled && self.state.is_terminal()
    }
}

/// Shared cell holding the current state of a cycle.
///
/// Written by the coordinator task and by the watchdog; both race to reach
/// a terminal state and only the first one wins.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<Snapshot>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot {
            state: ShutdownState::Idle,
            settled: false,
        });
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub(crate) fn current(&self) -> ShutdownState {
        self.tx.borrow().state
    }

    /// Move to `next` unless the cycle already ended.
    /// Returns true if the transition happened.
    pub(crate) fn advance(&self, next: ShutdownState) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state.is_terminal() {
                return false;
            }
            snapshot.state = next;
            snapshot.settled = next != ShutdownState::ForcedExit;
            true
        })
    }

    /// Release waiters held back by a claimed forced exit.
    pub(crate) fn settle(&self) {
        self.tx.send_if_modified(|snapshot| {
            let changed = !snapshot.settled;
            snapshot.settled = true;
            changed
        });
    }
}

/// One-shot notification that a shutdown cycle completed.
///
/// Returned by [`ShutdownCoordinator::await_shutdown`](crate::ShutdownCoordinator::await_shutdown).
/// Clones observe the same cycle, and observers that start waiting after
/// completion resolve immediately. A `Completion` can be awaited directly:
///
/// ```rust,ignore
/// coordinator.await_shutdown(CancellationToken::new()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Snapshot>,
    timeout: Duration,
}

impl Completion {
    pub(crate) const fn new(rx: watch::Receiver<Snapshot>, timeout: Duration) -> Self {
        Self { rx, timeout }
    }

    /// Current state of the cycle.
    #[must_use]
    pub fn state(&self) -> ShutdownState {
        self.rx.borrow().state
    }

    /// Whether the completion signal has fired.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state() == ShutdownState::Completed
    }

    /// Wait until every step has finished.
    ///
    /// # Errors
    ///
    /// With the default exit hook a forced exit ends the process, so this
    /// only ever returns `Ok`. With a non-terminating hook it returns
    /// `Error::Timeout` after the fatal event was logged and the hook
    /// returned. It returns `Error::InvalidState` if the coordinator stopped
    /// before running a cycle, for example because signal subscription
    /// failed.
    pub async fn wait(&mut self) -> Result<()> {
        let reached = self
            .rx
            .wait_for(|snapshot| snapshot.resolved())
            .await
            .map(|snapshot| snapshot.state);

        match reached {
            Ok(ShutdownState::Completed) => Ok(()),
            Ok(_) => Err(Error::timeout(
                "graceful shutdown",
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
            Err(_) => Err(Error::invalid_state(format!(
                "coordinator stopped in state {} without completing",
                self.state()
            ))),
        }
    }
}

impl IntoFuture for Completion {
    type Output = Result<()>;
    type IntoFuture = BoxFuture<'static, Result<()>>;

    fn into_future(mut self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_sticky() {
        let cell = StateCell::new();
        assert!(cell.advance(ShutdownState::SignalReceived));
        assert!(cell.advance(ShutdownState::StepsRunning));
        assert!(cell.advance(ShutdownState::Completed));

        assert!(!cell.advance(ShutdownState::ForcedExit));
        assert_eq!(cell.current(), ShutdownState::Completed);
    }

    #[test]
    fn test_forced_exit_blocks_completion() {
        let cell = StateCell::new();
        assert!(cell.advance(ShutdownState::StepsRunning));
        assert!(cell.advance(ShutdownState::ForcedExit));
        assert!(!cell.advance(ShutdownState::Completed));
        assert_eq!(cell.current(), ShutdownState::ForcedExit);
    }

    #[tokio::test]
    async fn test_late_observer_resolves_immediately() {
        let test_result = tokio::time::timeout(Duration::from_secs(5), async {
            let cell = StateCell::new();
            let mut completion = Completion::new(cell.subscribe(), Duration::from_secs(1));
            cell.advance(ShutdownState::Completed);
            drop(cell);

            assert!(completion.is_complete());
            assert!(completion.wait().await.is_ok());
            assert!(completion.clone().await.is_ok());
        })
        .await;

        assert!(test_result.is_ok(), "Test timed out after 5 seconds");
    }

    #[tokio::test]
    async fn test_forced_exit_reports_timeout() {
        let cell = StateCell::new();
        let mut completion = Completion::new(cell.subscribe(), Duration::from_millis(250));
        cell.advance(ShutdownState::ForcedExit);
        cell.settle();

        let err = completion.wait().await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_claimed_forced_exit_holds_waiters() {
        let test_result = tokio::time::timeout(Duration::from_secs(5), async {
            let cell = StateCell::new();
            let mut completion = Completion::new(cell.subscribe(), Duration::from_millis(250));
            assert!(cell.advance(ShutdownState::ForcedExit));
            assert_eq!(completion.state(), ShutdownState::ForcedExit);

            let early = tokio::time::timeout(Duration::from_millis(50), completion.wait()).await;
            assert!(early.is_err(), "waiter resolved before the forced exit settled");

            cell.settle();
            assert!(completion.wait().await.unwrap_err().is_timeout());
        })
        .await;

        assert!(test_result.is_ok(), "Test timed out after 5 seconds");
    }

    #[tokio::test]
    async fn test_dropped_coordinator_reports_invalid_state() {
        let cell = StateCell::new();
        let mut completion = Completion::new(cell.subscribe(), Duration::from_secs(1));
        drop(cell);

        let err = completion.wait().await.unwrap_err();
        assert_eq!(err.category(), "state");
        assert_eq!(completion.state(), ShutdownState::Idle);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ShutdownState::StepsRunning.to_string(), "StepsRunning");
        assert!(ShutdownState::ForcedExit.is_terminal());
        assert!(!ShutdownState::SignalReceived.is_terminal());
    }
}
