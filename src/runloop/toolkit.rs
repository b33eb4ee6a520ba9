// RunLoopToolkit - the contract a UI toolkit implements to be hosted
//
// Hooks run on the dedicated loop thread in this order:
//   pre_loop_start  -> install a dispatcher
//   (initializers are queued, shells are created)
//   loop_start      -> signal readiness, then block until the loop ends

use crate::error::LifecycleError;
use crate::host::HostLifetime;
use crate::metrics::LifecycleMetrics;
use crate::runloop::context::{Dispatcher, LoopContext};
use crate::runloop::shell::{Shell, ShellSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A UI toolkit's run loop.
pub trait RunLoopToolkit: Send + 'static {
    /// Loop-side state handed to every dispatched callback.
    type Context: 'static;

    /// Prepare the loop on its own thread. Must install a dispatcher.
    fn pre_loop_start(&mut self, scope: &LoopScope<Self::Context>) -> Result<(), LifecycleError>;

    /// Run the loop. Call [`LoopScope::mark_running`] once ready; return
    /// when the loop ends. If it returns `false`, return without running.
    fn loop_start(
        &mut self,
        scope: &LoopScope<Self::Context>,
        shells: Vec<Box<dyn Shell>>,
    ) -> Result<(), LifecycleError>;

    /// The shells owned by the loop. Called on the loop thread.
    fn shells(context: &mut Self::Context) -> &mut ShellSet;

    /// Make `loop_start` return after the current callback.
    fn quit(context: &mut Self::Context);
}

/// Setup run on the loop thread before any other dispatched work.
///
/// Registered in the service registry as `Arc<dyn LoopInitializer<C>>`.
pub trait LoopInitializer<C>: Send + Sync {
    fn initialize(&self, context: &mut C);
}

impl<C, F> LoopInitializer<C> for F
where
    F: Fn(&mut C) + Send + Sync,
{
    fn initialize(&self, context: &mut C) {
        self(context)
    }
}

/// What a toolkit may do to its own loop from inside the hooks.
pub struct LoopScope<C: 'static> {
    context: Arc<LoopContext<C>>,
    lifetime: Arc<HostLifetime>,
    metrics: Arc<LifecycleMetrics>,
    exit_handled: AtomicBool,
}

impl<C: 'static> LoopScope<C> {
    pub(crate) fn new(
        context: Arc<LoopContext<C>>,
        lifetime: Arc<HostLifetime>,
        metrics: Arc<LifecycleMetrics>,
    ) -> Self {
        Self {
            context,
            lifetime,
            metrics,
            exit_handled: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &LoopContext<C> {
        &self.context
    }

    /// Install the loop's dispatcher. Only the first call wins.
    pub fn install_dispatcher(&self, dispatcher: Arc<dyn Dispatcher<C>>) -> bool {
        let installed = self.context.install_dispatcher(dispatcher);
        if !installed {
            tracing::warn!(run_loop = self.context.name(), "Dispatcher already installed");
        }
        installed
    }

    /// The loop is ready to accept work.
    ///
    /// Returns `false` when the host shut the loop down before it got here.
    pub fn mark_running(&self) -> bool {
        if self.context.mark_running() {
            tracing::info!(run_loop = self.context.name(), "Run loop running");
            return true;
        }
        if self.context.is_cancelled() {
            tracing::info!(run_loop = self.context.name(), "Shut down before readiness, not running");
        }
        false
    }

    /// The loop ended without a shutdown request (the user closed the last
    /// shell). Stops the host if the loop is lifetime-linked.
    pub fn handle_application_exit(&self) {
        if self.exit_handled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.context.mark_exited();

        if self.context.is_shutdown_requested() {
            tracing::debug!(run_loop = self.context.name(), "Loop exit follows a shutdown request");
            return;
        }

        self.metrics.record_application_exit();
        if self.context.is_lifetime_linked() {
            tracing::info!(run_loop = self.context.name(), "Run loop exited, stopping host");
            self.lifetime.request_stop();
        } else {
            tracing::info!(run_loop = self.context.name(), "Run loop exited, host keeps running");
        }
    }

    pub(crate) fn exit_handled(&self) -> bool {
        self.exit_handled.load(Ordering::SeqCst)
    }
}
