//! Termination event sources.
//!
//! The coordinator never talks to the OS directly. It waits on a
//! [`TerminationSource`], which yields [`TerminationSignal`]s. Two sources
//! ship with the crate:
//!
//! - [`OsSignals`]: process signals through `tokio::signal` (SIGINT, SIGTERM,
//!   SIGHUP and optionally SIGQUIT on Unix; console events on Windows).
//! - [`ManualSource`]: fired programmatically through a [`ShutdownTrigger`],
//!   for tests and for applications that decide to stop on their own.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Termination event that starts a shutdown cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM / system shutdown event
    Terminate,
    /// SIGHUP / console close event
    Hangup,
    /// SIGQUIT / Ctrl+Break
    Quit,
    /// Triggered programmatically
    Manual,
}

impl TerminationSignal {
    /// Conventional Unix signal number, if the event maps to one.
    #[must_use]
    pub const fn number(self) -> Option<i32> {
        match self {
            Self::Hangup => Some(1),
            Self::Interrupt => Some(2),
            Self::Quit => Some(3),
            Self::Terminate => Some(15),
            Self::Manual => None,
        }
    }

    /// Short name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Helper function to get a human-readable description of a signal number.
#[must_use]
pub const fn signal_description(signal: i32) -> &'static str {
    match signal {
        1 => "SIGHUP (Hangup)",
        2 => "SIGINT (Interrupt/Ctrl+C)",
        3 => "SIGQUIT (Quit)",
        9 => "SIGKILL (Kill - non-catchable)",
        15 => "SIGTERM (Terminate)",
        _ => "Unknown signal",
    }
}

/// Future returned by [`TerminationSource::recv`].
pub type SignalFuture<'a> = Pin<Box<dyn Future<Output = Result<TerminationSignal>> + Send + 'a>>;

/// Source of termination events.
///
/// `recv` resolves with the next event. The coordinator calls it once to
/// start the cycle and keeps calling it while steps run, logging and
/// discarding every later event.
pub trait TerminationSource: Send + 'static {
    /// Wait for the next termination event.
    ///
    /// # Errors
    ///
    /// Returns an error if the source can no longer deliver events, e.g.
    /// an OS handler could not be installed or every trigger was dropped.
    fn recv(&mut self) -> SignalFuture<'_>;
}

impl<T: TerminationSource + ?Sized> TerminationSource for Box<T> {
    fn recv(&mut self) -> SignalFuture<'_> {
        (**self).recv()
    }
}

/// Which OS signals start a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// SIGINT (Ctrl+C)
    pub interrupt: bool,
    /// SIGTERM
    pub terminate: bool,
    /// SIGHUP
    pub hangup: bool,
    /// SIGQUIT
    pub quit: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            interrupt: true,
            terminate: true,
            hangup: true,
            quit: false,
        }
    }
}

impl SignalConfig {
    /// Create a new signal configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable SIGQUIT handling.
    #[must_use]
    pub const fn with_sigquit(mut self) -> Self {
        self.quit = true;
        self
    }

    /// Disable SIGHUP handling.
    #[must_use]
    pub const fn without_sighup(mut self) -> Self {
        self.hangup = false;
        self
    }

    /// Disable SIGINT handling.
    #[must_use]
    pub const fn without_sigint(mut self) -> Self {
        self.interrupt = false;
        self
    }

    /// Disable SIGTERM handling.
    #[must_use]
    pub const fn without_sigterm(mut self) -> Self {
        self.terminate = false;
        self
    }

    /// Signals that will be subscribed to.
    #[must_use]
    pub fn enabled(&self) -> Vec<TerminationSignal> {
        let mut signals = Vec::with_capacity(4);
        if self.interrupt {
            signals.push(TerminationSignal::Interrupt);
        }
        if self.terminate {
            signals.push(TerminationSignal::Terminate);
        }
        if self.hangup {
            signals.push(TerminationSignal::Hangup);
        }
        if self.quit {
            signals.push(TerminationSignal::Quit);
        }
        signals
    }
}

/// OS signal source backed by `tokio::signal`.
///
/// Handlers are installed lazily on the first `recv`, from inside the
/// coordinator task. Once installed they stay installed for the life of the
/// process, so repeated signals never fall back to the default disposition.
#[derive(Debug)]
pub struct OsSignals {
    config: SignalConfig,
    streams: Option<platform::Streams>,
}

impl OsSignals {
    /// Create a source for the given signal set.
    #[must_use]
    pub const fn new(config: SignalConfig) -> Self {
        Self {
            config,
            streams: None,
        }
    }

    /// The configured signal set.
    #[must_use]
    pub const fn config(&self) -> &SignalConfig {
        &self.config
    }
}

impl Default for OsSignals {
    fn default() -> Self {
        Self::new(SignalConfig::default())
    }
}

impl TerminationSource for OsSignals {
    fn recv(&mut self) -> SignalFuture<'_> {
        Box::pin(async move {
            let streams = match self.streams.take() {
                Some(streams) => streams,
                None => {
                    let streams = platform::Streams::subscribe(&self.config)?;
                    info!(signals = ?self.config.enabled(), "termination signal handlers registered");
                    streams
                }
            };
            self.streams.insert(streams).recv().await
        })
    }
}

#[cfg(unix)]
mod platform {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    use super::{SignalConfig, TerminationSignal};
    use crate::error::{Error, Result};

    #[derive(Debug)]
    pub(super) struct Streams {
        interrupt: Option<Signal>,
        terminate: Option<Signal>,
        hangup: Option<Signal>,
        quit: Option<Signal>,
    }

    fn register(enabled: bool, kind: SignalKind, signal_number: i32) -> Result<Option<Signal>> {
        if !enabled {
            return Ok(None);
        }
        signal(kind).map(Some).map_err(|e| {
            Error::signal_register(
                format!(
                    "Failed to register {} handler",
                    super::signal_description(signal_number)
                ),
                signal_number,
                e,
            )
        })
    }

    async fn next(stream: &mut Option<Signal>) {
        match stream {
            Some(stream) => {
                if stream.recv().await.is_none() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    impl Streams {
        pub(super) fn subscribe(config: &SignalConfig) -> Result<Self> {
            if config.enabled().is_empty() {
                return Err(Error::signal("No termination signals enabled"));
            }
            Ok(Self {
                interrupt: register(config.interrupt, SignalKind::interrupt(), 2)?,
                terminate: register(config.terminate, SignalKind::terminate(), 15)?,
                hangup: register(config.hangup, SignalKind::hangup(), 1)?,
                quit: register(config.quit, SignalKind::quit(), 3)?,
            })
        }

        pub(super) async fn recv(&mut self) -> Result<TerminationSignal> {
            let signal = tokio::select! {
                () = next(&mut self.interrupt) => TerminationSignal::Interrupt,
                () = next(&mut self.terminate) => TerminationSignal::Terminate,
                () = next(&mut self.hangup) => TerminationSignal::Hangup,
                () = next(&mut self.quit) => TerminationSignal::Quit,
            };
            Ok(signal)
        }
    }
}

#[cfg(windows)]
mod platform {
    use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close, ctrl_shutdown};
    use tokio::signal::windows::{CtrlBreak, CtrlC, CtrlClose, CtrlShutdown};

    use super::{SignalConfig, TerminationSignal};
    use crate::error::{Error, Result};

    pub(super) struct Streams {
        ctrl_c: Option<CtrlC>,
        ctrl_break: Option<CtrlBreak>,
        ctrl_close: Option<CtrlClose>,
        ctrl_shutdown: Option<CtrlShutdown>,
    }

    impl std::fmt::Debug for Streams {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Streams").finish_non_exhaustive()
        }
    }

    fn register<T>(
        enabled: bool,
        install: fn() -> std::io::Result<T>,
        signal_number: i32,
    ) -> Result<Option<T>> {
        if !enabled {
            return Ok(None);
        }
        install().map(Some).map_err(|e| {
            Error::signal_register("Failed to register console event handler", signal_number, e)
        })
    }

    macro_rules! next {
        ($stream:expr) => {
            async {
                match $stream.as_mut() {
                    Some(stream) => {
                        if stream.recv().await.is_none() {
                            std::future::pending::<()>().await;
                        }
                    }
                    None => std::future::pending::<()>().await,
                }
            }
        };
    }

    impl Streams {
        pub(super) fn subscribe(config: &SignalConfig) -> Result<Self> {
            if config.enabled().is_empty() {
                return Err(Error::signal("No termination signals enabled"));
            }
            Ok(Self {
                ctrl_c: register(config.interrupt, ctrl_c, 2)?,
                ctrl_break: register(config.quit, ctrl_break, 3)?,
                ctrl_close: register(config.hangup, ctrl_close, 1)?,
                ctrl_shutdown: register(config.terminate, ctrl_shutdown, 15)?,
            })
        }

        pub(super) async fn recv(&mut self) -> Result<TerminationSignal> {
            let signal = tokio::select! {
                () = next!(self.ctrl_c) => TerminationSignal::Interrupt,
                () = next!(self.ctrl_break) => TerminationSignal::Quit,
                () = next!(self.ctrl_close) => TerminationSignal::Hangup,
                () = next!(self.ctrl_shutdown) => TerminationSignal::Terminate,
            };
            Ok(signal)
        }
    }
}

/// Programmatic termination source.
///
/// Created together with a [`ShutdownTrigger`] by [`manual`].
#[derive(Debug)]
pub struct ManualSource {
    rx: mpsc::UnboundedReceiver<TerminationSignal>,
}

/// Handle that fires a [`ManualSource`].
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::UnboundedSender<TerminationSignal>,
}

/// Create a connected trigger/source pair.
#[must_use]
pub fn manual() -> (ShutdownTrigger, ManualSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ShutdownTrigger { tx }, ManualSource { rx })
}

impl ShutdownTrigger {
    /// Start shutdown as if a signal arrived.
    /// Returns false if the coordinator is gone.
    pub fn fire(&self) -> bool {
        self.send(TerminationSignal::Manual)
    }

    /// Deliver a specific signal, e.g. to simulate SIGTERM in tests.
    pub fn send(&self, signal: TerminationSignal) -> bool {
        let delivered = self.tx.send(signal).is_ok();
        if !delivered {
            debug!(%signal, "termination source dropped, trigger ignored");
        }
        delivered
    }
}

impl TerminationSource for ManualSource {
    fn recv(&mut self) -> SignalFuture<'_> {
        Box::pin(async move {
            self.rx
                .recv()
                .await
                .ok_or_else(|| Error::signal("Every shutdown trigger was dropped"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_description() {
        assert_eq!(signal_description(15), "SIGTERM (Terminate)");
        assert_eq!(signal_description(2), "SIGINT (Interrupt/Ctrl+C)");
        assert_eq!(signal_description(999), "Unknown signal");
    }

    #[test]
    fn test_signal_numbers() {
        assert_eq!(TerminationSignal::Terminate.number(), Some(15));
        assert_eq!(TerminationSignal::Hangup.number(), Some(1));
        assert_eq!(TerminationSignal::Manual.number(), None);
        assert_eq!(TerminationSignal::Interrupt.to_string(), "SIGINT");
    }

    #[test]
    fn test_signal_config() {
        let config = SignalConfig::new().with_sigquit().without_sighup();
        assert!(config.interrupt);
        assert!(config.terminate);
        assert!(!config.hangup);
        assert!(config.quit);
        assert_eq!(
            config.enabled(),
            vec![
                TerminationSignal::Interrupt,
                TerminationSignal::Terminate,
                TerminationSignal::Quit
            ]
        );
    }

    #[test]
    fn test_default_signal_set() {
        assert_eq!(
            SignalConfig::default().enabled(),
            vec![
                TerminationSignal::Interrupt,
                TerminationSignal::Terminate,
                TerminationSignal::Hangup
            ]
        );
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let test_result = tokio::time::timeout(Duration::from_secs(5), async {
            let (trigger, mut source) = manual();
            assert!(trigger.send(TerminationSignal::Terminate));
            assert!(trigger.fire());

            assert_eq!(source.recv().await.unwrap(), TerminationSignal::Terminate);
            assert_eq!(source.recv().await.unwrap(), TerminationSignal::Manual);
        })
        .await;

        assert!(test_result.is_ok(), "Test timed out after 5 seconds");
    }

    #[tokio::test]
    async fn test_manual_source_closed() {
        let (trigger, mut source) = manual();
        drop(trigger);
        let err = source.recv().await.unwrap_err();
        assert_eq!(err.category(), "signal");
    }

    #[tokio::test]
    async fn test_trigger_after_source_dropped() {
        let (trigger, source) = manual();
        drop(source);
        assert!(!trigger.fire());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_os_source_rejects_empty_set() {
        let config = SignalConfig::new()
            .without_sigint()
            .without_sigterm()
            .without_sighup();
        let mut source = OsSignals::new(config);
        let err = source.recv().await.unwrap_err();
        assert_eq!(err.category(), "signal");
    }
}
