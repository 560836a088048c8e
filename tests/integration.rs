//! Integration tests for shutdown-coordinator.

use shutdown_coordinator::{
    manual, Config, Error, RecordingExit, ShutdownCoordinator, ShutdownState, ShutdownTrigger,
    TerminationSignal,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;

const UNIT: Duration = Duration::from_millis(100);

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    fn dispatch(&self) -> Dispatch {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        Dispatch::new(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }

    fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

struct Harness {
    shutdown: ShutdownCoordinator,
    trigger: ShutdownTrigger,
    exit: RecordingExit,
    logs: CapturedLogs,
}

fn harness(deadline: Duration) -> Harness {
    let (trigger, source) = manual();
    let exit = RecordingExit::new();
    let logs = CapturedLogs::default();
    let shutdown = ShutdownCoordinator::builder()
        .name("integration")
        .timeout(deadline)
        .source(source)
        .exit_hook(exit.hook())
        .dispatch(logs.dispatch())
        .build();
    Harness {
        shutdown,
        trigger,
        exit,
        logs,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_steps_finish_within_deadline() {
    let test_result = timeout(Duration::from_secs(5), async {
        let Harness {
            mut shutdown,
            trigger,
            exit,
            logs,
        } = harness(UNIT * 3);

        for (name, units) in [("cleanup-cache", 1), ("flush-metrics", 2), ("close-temp-files", 1)] {
            shutdown.add_step(name, move |_ctx| async move {
                tokio::time::sleep(UNIT * units).await;
                Ok(())
            });
        }

        let completion = shutdown.await_shutdown(CancellationToken::new());
        let start = Instant::now();
        trigger.fire();
        completion.clone().await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= UNIT * 2, "finished before the slowest step: {elapsed:?}");
        assert!(elapsed < UNIT * 3, "steps did not run concurrently: {elapsed:?}");
        assert_eq!(completion.state(), ShutdownState::Completed);

        assert_eq!(logs.count("shutdown signal received"), 1);
        assert_eq!(logs.count("executing shutdown step"), 3);
        assert_eq!(logs.count("shutdown step completed"), 3);
        assert_eq!(logs.count("graceful shutdown complete"), 1);
        for name in ["cleanup-cache", "flush-metrics", "close-temp-files"] {
            assert!(logs.contents().contains(name), "missing log for {name}");
        }

        // The watchdog stays quiet past the deadline once the cycle completed.
        tokio::time::sleep(UNIT * 3).await;
        assert!(!exit.was_called());
        assert_eq!(logs.count("forcing exit"), 0);
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_forces_exit() {
    let test_result = timeout(Duration::from_secs(5), async {
        let (trigger, source) = manual();
        let logs = CapturedLogs::default();
        let exited_at: Arc<Mutex<Option<(i32, Instant)>>> = Arc::default();
        let record = Arc::clone(&exited_at);
        let mut shutdown = ShutdownCoordinator::builder()
            .name("integration")
            .timeout(UNIT)
            .source(source)
            .exit_hook(Arc::new(move |code: i32| {
                *record.lock().unwrap() = Some((code, Instant::now()));
            }))
            .dispatch(logs.dispatch())
            .build();

        shutdown.add_step("slow-step", |_ctx| async {
            tokio::time::sleep(UNIT * 5).await;
            Ok(())
        });

        let mut completion = shutdown.await_shutdown(CancellationToken::new());
        let fired = Instant::now();
        trigger.fire();

        let err = completion.wait().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!completion.is_complete());

        // By the time the waiter resumes, the exit already happened and was logged.
        let (code, at) = exited_at.lock().unwrap().expect("exit hook ran before the waiter resumed");
        assert_eq!(code, 1);
        let after = at.duration_since(fired);
        assert!(after >= UNIT && after < UNIT * 2, "exit after {after:?}");

        let output = logs.contents();
        assert!(output.contains("graceful shutdown timed out, forcing exit"));
        assert!(output.contains("fatal"));
        assert!(output.contains("slow-step"));
        assert_eq!(logs.count("graceful shutdown complete"), 0);
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_step_is_logged_and_others_finish() {
    let test_result = timeout(Duration::from_secs(5), async {
        let Harness {
            mut shutdown,
            trigger,
            exit,
            logs,
        } = harness(UNIT * 5);

        shutdown
            .add_step("broken-step", |_ctx| async {
                Err(Error::step("broken-step", "disk unavailable"))
            })
            .add_step("healthy-step", |_ctx| async {
                tokio::time::sleep(UNIT).await;
                Ok(())
            });

        let completion = shutdown.await_shutdown(CancellationToken::new());
        trigger.fire();
        completion.await.unwrap();

        let output = logs.contents();
        let failure = output
            .lines()
            .find(|line| line.contains("shutdown step failed"))
            .expect("failure was logged");
        assert!(failure.contains("ERROR"));
        assert!(failure.contains("broken-step"));
        assert!(failure.contains("disk unavailable"));
        assert_eq!(logs.count("shutdown step completed"), 1);
        assert!(!exit.was_called());
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_steps_complete_immediately() {
    let test_result = timeout(Duration::from_secs(5), async {
        let Harness {
            shutdown,
            trigger,
            exit,
            logs,
        } = harness(UNIT * 3);

        let completion = shutdown.await_shutdown(CancellationToken::new());
        let start = Instant::now();
        trigger.send(TerminationSignal::Terminate);
        completion.await.unwrap();

        assert!(start.elapsed() < UNIT);
        assert_eq!(logs.count("graceful shutdown complete"), 1);
        assert!(!exit.was_called());
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_signal_is_ignored() {
    let test_result = timeout(Duration::from_secs(5), async {
        let Harness {
            mut shutdown,
            trigger,
            exit,
            logs,
        } = harness(UNIT * 5);

        shutdown.add_step("drain", |_ctx| async {
            tokio::time::sleep(UNIT * 2).await;
            Ok(())
        });

        let completion = shutdown.await_shutdown(CancellationToken::new());
        trigger.send(TerminationSignal::Interrupt);
        tokio::time::sleep(UNIT / 2).await;
        assert_eq!(completion.state(), ShutdownState::StepsRunning);
        assert!(trigger.send(TerminationSignal::Interrupt));

        completion.await.unwrap();

        assert_eq!(logs.count("shutdown signal received"), 1);
        assert_eq!(logs.count("executing shutdown step"), 1);
        assert_eq!(logs.count("shutdown already in progress, ignoring signal"), 1);
        assert!(!exit.was_called());
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_steps_observe_signal_and_deadline() {
    let test_result = timeout(Duration::from_secs(5), async {
        let Harness {
            mut shutdown,
            trigger,
            exit,
            ..
        } = harness(UNIT * 10);

        let seen = Arc::new(Mutex::new(None));
        let seen_by_step = Arc::clone(&seen);
        shutdown.add_step("inspect", move |ctx| async move {
            *seen_by_step.lock().unwrap() = Some((ctx.signal(), ctx.time_remaining()));
            Ok(())
        });

        let completion = shutdown.await_shutdown(CancellationToken::new());
        trigger.send(TerminationSignal::Hangup);
        completion.await.unwrap();

        let (signal, remaining) = seen.lock().unwrap().take().expect("step ran");
        assert_eq!(signal, TerminationSignal::Hangup);
        let remaining = remaining.expect("deadline still ahead");
        assert!(remaining <= UNIT * 10 && remaining > UNIT * 5);
        assert!(!exit.was_called());
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_observer_resolves_immediately() {
    let test_result = timeout(Duration::from_secs(5), async {
        let Harness {
            shutdown, trigger, ..
        } = harness(UNIT * 3);

        let completion = shutdown.await_shutdown(CancellationToken::new());
        let early = completion.clone();
        trigger.fire();
        early.await.unwrap();

        let start = Instant::now();
        completion.clone().await.unwrap();
        completion.await.unwrap();
        assert!(start.elapsed() < UNIT);
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_config_exit_code_is_used() {
    let test_result = timeout(Duration::from_secs(5), async {
        let config = Config::builder()
            .name("configured")
            .shutdown_timeout(UNIT)
            .unwrap()
            .exit_code(3)
            .build()
            .unwrap();

        let (trigger, source) = manual();
        let exit = RecordingExit::new();
        let logs = CapturedLogs::default();
        let mut shutdown = ShutdownCoordinator::from_config(&config)
            .source(source)
            .exit_hook(exit.hook())
            .dispatch(logs.dispatch())
            .build();
        shutdown.add_step("stuck", |_ctx| std::future::pending::<shutdown_coordinator::Result<()>>());

        let completion = shutdown.await_shutdown(CancellationToken::new());
        trigger.fire();
        assert!(completion.await.unwrap_err().is_timeout());

        assert_eq!(exit.calls(), vec![3]);
        assert!(logs.contents().contains("configured"));
    })
    .await;

    assert!(test_result.is_ok(), "Test timed out after 5 seconds");
}
