//! Named cleanup steps.

use std::future::Future;
use std::pin::Pin;

use crate::context::ShutdownContext;
use crate::error::Result;

/// Future produced by a step action.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Boxed step action. Runs at most once per process.
pub type StepFn = Box<dyn FnOnce(ShutdownContext) -> StepFuture + Send>;

/// Trait for struct-based cleanup steps.
///
/// Closures registered with
/// [`add_step`](crate::ShutdownCoordinator::add_step) cover most needs;
/// implement this when the cleanup owns state, e.g. a connection pool.
pub trait Cleanup: Send + 'static {
    /// Name used in every log entry about this step.
    fn name(&self) -> &str;

    /// Run the cleanup. `ctx` is cancelled when the shutdown deadline passes.
    fn run(self: Box<Self>, ctx: ShutdownContext) -> StepFuture;
}

/// A registered step: a name and the action to run on shutdown.
pub struct ShutdownStep {
    name: String,
    action: StepFn,
}

impl ShutdownStep {
    /// Create a step from a closure returning a future.
    pub fn new<S, F, Fut>(name: S, action: F) -> Self
    where
        S: Into<String>,
        F: FnOnce(ShutdownContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(move |ctx| Box::pin(action(ctx))),
        }
    }

    /// Create a step from a [`Cleanup`] implementor.
    pub fn from_cleanup<C: Cleanup>(cleanup: C) -> Self {
        let name = cleanup.name().to_owned();
        let cleanup = Box::new(cleanup);
        Self {
            name,
            action: Box::new(move |ctx| cleanup.run(ctx)),
        }
    }

    /// Step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, StepFn) {
        (self.name, self.action)
    }
}

impl std::fmt::Debug for ShutdownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownStep")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
