//! Graceful shutdown demo.
//!
//! Registers three cleanup steps, then waits for Ctrl+C (or SIGTERM/SIGHUP).
//! The steps take 1s, 2s and 1s and run concurrently, so the whole shutdown
//! takes about 2s, well under the 10s default deadline.
//!
//! Try `GRACEFUL_SHUTDOWN__TIMEOUT_MS=1500 cargo run --example graceful` to
//! watch the deadline force an exit instead.

use shutdown_coordinator::{logging, Config, Result, ShutdownContext, ShutdownCoordinator};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

async fn simulated_cleanup(ctx: ShutdownContext, what: &'static str, takes: Duration) -> Result<()> {
    if ctx.run_until_cancelled(tokio::time::sleep(takes)).await.is_none() {
        warn!(what, "cleanup interrupted by the shutdown deadline");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    logging::init(&config.logging)?;

    let mut shutdown = ShutdownCoordinator::from_config(&config).build();
    shutdown
        .add_step("cleanup-cache", |ctx| {
            simulated_cleanup(ctx, "cache", Duration::from_secs(1))
        })
        .add_step("flush-metrics", |ctx| {
            simulated_cleanup(ctx, "metrics", Duration::from_secs(2))
        })
        .add_step("close-temp-files", |ctx| {
            simulated_cleanup(ctx, "temp files", Duration::from_secs(1))
        });

    let done = shutdown.await_shutdown(CancellationToken::new());
    info!(
        timeout_ms = config.shutdown.timeout_ms,
        "running, press Ctrl+C to shut down"
    );

    done.await?;
    info!("graceful shutdown complete.");
    Ok(())
}
