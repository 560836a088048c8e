//! Channel facade used by the watchdog thread, with an optional lock-free backend.
//!
//! When built with the `lockfree-coordination` feature, this module uses
//! `crossbeam-channel`. Otherwise it falls back to `std::sync::mpsc`.
//! Both backends expose the same blocking `recv_timeout` helper, which is
//! all the watchdog needs: it runs on a plain OS thread, outside the async
//! runtime.

#[cfg(feature = "lockfree-coordination")]
/// Channel facade backed by `crossbeam-channel` when the
/// `lockfree-coordination` feature is enabled.
pub mod chan {
    pub use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
    use std::time::Duration;

    /// Blocking receive with a deadline, mirroring the fallback API.
    ///
    /// # Errors
    ///
    /// Returns `RecvTimeoutError::Timeout` when nothing arrived in time and
    /// `RecvTimeoutError::Disconnected` when every sender was dropped.
    #[inline]
    pub fn recv_timeout<T>(rx: &Receiver<T>, timeout: Duration) -> Result<T, RecvTimeoutError> {
        rx.recv_timeout(timeout)
    }
}

#[cfg(not(feature = "lockfree-coordination"))]
/// Channel facade backed by `std::sync::mpsc` when the
/// `lockfree-coordination` feature is disabled.
pub mod chan {
    use std::sync::mpsc;
    use std::time::Duration;

    /// Type alias for `mpsc::Sender`.
    pub type Sender<T> = mpsc::Sender<T>;

    /// Type alias for `mpsc::Receiver`.
    pub type Receiver<T> = mpsc::Receiver<T>;

    /// Error type for deadline-bounded receive operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RecvTimeoutError {
        /// The deadline elapsed before a message arrived.
        Timeout,
        /// The channel is disconnected.
        Disconnected,
    }

    /// Create an unbounded channel returning `(Sender, Receiver)`.
    #[must_use]
    pub fn unbounded<T>() -> (Sender<T>, Receiver<T>) {
        mpsc::channel()
    }

    /// Blocking receive with a deadline, mirroring the crossbeam API.
    ///
    /// # Errors
    ///
    /// Returns `RecvTimeoutError::Timeout` when nothing arrived in time and
    /// `RecvTimeoutError::Disconnected` when every sender was dropped.
    #[inline]
    pub fn recv_timeout<T>(rx: &Receiver<T>, timeout: Duration) -> Result<T, RecvTimeoutError> {
        rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => RecvTimeoutError::Timeout,
            mpsc::RecvTimeoutError::Disconnected => RecvTimeoutError::Disconnected,
        })
    }
}
