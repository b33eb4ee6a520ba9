// QueueToolkit - a headless run loop driven by a bounded callback queue
//
// The loop thread drains a tokio mpsc channel with `blocking_recv`, running
// each callback against the loop's QueueContext. It stands in for a real UI
// toolkit wherever the loop only has to own state and marshal work.

use crate::error::LifecycleError;
use crate::runloop::context::{Dispatcher, LoopCallback};
use crate::runloop::shell::{Shell, ShellCloseResult, ShellMode, ShellSet};
use crate::runloop::toolkit::{LoopScope, RunLoopToolkit};
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;

thread_local! {
    static CURRENT: RefCell<Option<QueueDispatcher>> = const { RefCell::new(None) };
}

/// Loop-side state of a [`QueueToolkit`] loop.
pub struct QueueContext {
    shells: ShellSet,
    quit: bool,
    processed: u64,
}

impl QueueContext {
    fn new(shells: ShellSet) -> Self {
        Self {
            shells,
            quit: false,
            processed: 0,
        }
    }

    pub fn shells(&self) -> &ShellSet {
        &self.shells
    }

    pub fn shells_mut(&mut self) -> &mut ShellSet {
        &mut self.shells
    }

    /// Close one shell, as a user closing a window would.
    pub fn close_shell(&mut self, name: &str) -> ShellCloseResult {
        self.shells.close(name)
    }

    /// End the loop after the current callback.
    pub fn quit(&mut self) {
        self.quit = true;
    }

    /// Callbacks run so far, not counting the current one.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

/// Sends callbacks to a [`QueueToolkit`] loop.
#[derive(Clone)]
pub struct QueueDispatcher {
    name: Arc<str>,
    tx: mpsc::Sender<LoopCallback<QueueContext>>,
}

impl QueueDispatcher {
    /// The dispatcher of the loop running on the calling thread, if any.
    pub fn current() -> Option<QueueDispatcher> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Dispatcher<QueueContext> for QueueDispatcher {
    fn submit(&self, callback: LoopCallback<QueueContext>) -> Result<(), LifecycleError> {
        match self.tx.try_send(callback) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(run_loop = %self.name, "Dispatch queue full, rejecting callback");
                Err(LifecycleError::DispatchRejected {
                    name: self.name.to_string(),
                    reason: "dispatch queue is full".to_string(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(LifecycleError::LoopUnavailable(self.name.to_string()))
            }
        }
    }
}

/// Headless toolkit whose loop runs dispatched callbacks until it quits or
/// every shell has closed.
pub struct QueueToolkit {
    capacity: usize,
    receiver: Option<mpsc::Receiver<LoopCallback<QueueContext>>>,
}

impl QueueToolkit {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            receiver: None,
        }
    }
}

impl Default for QueueToolkit {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl RunLoopToolkit for QueueToolkit {
    type Context = QueueContext;

    fn pre_loop_start(&mut self, scope: &LoopScope<QueueContext>) -> Result<(), LifecycleError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let dispatcher = QueueDispatcher {
            name: Arc::from(scope.context().name()),
            tx,
        };
        self.receiver = Some(rx);

        CURRENT.with(|current| *current.borrow_mut() = Some(dispatcher.clone()));
        scope.install_dispatcher(Arc::new(dispatcher));
        Ok(())
    }

    fn loop_start(
        &mut self,
        scope: &LoopScope<QueueContext>,
        shells: Vec<Box<dyn Shell>>,
    ) -> Result<(), LifecycleError> {
        let name = scope.context().name().to_string();
        let Some(mut rx) = self.receiver.take() else {
            return Err(LifecycleError::LoopUnavailable(name));
        };

        let mut ctx = QueueContext::new(ShellSet::new(shells));
        match ctx.shells.mode() {
            ShellMode::Empty => tracing::info!(run_loop = %name, "No shells, running until shut down"),
            ShellMode::Single => tracing::info!(run_loop = %name, shell = ?ctx.shells.names(), "Running bound to one shell"),
            ShellMode::Aggregate => tracing::info!(run_loop = %name, shells = ?ctx.shells.names(), "Running until every shell closes"),
        }
        if !scope.mark_running() {
            let report = ctx.shells.close_all();
            tracing::debug!(run_loop = %name, closed = report.closed, "Run loop cancelled before start");
            rx.close();
            CURRENT.with(|current| current.borrow_mut().take());
            return Ok(());
        }

        while let Some(callback) = rx.blocking_recv() {
            if catch_unwind(AssertUnwindSafe(|| callback(&mut ctx))).is_err() {
                tracing::error!(run_loop = %name, "Dispatched callback panicked");
            }
            ctx.processed += 1;

            if ctx.quit {
                tracing::debug!(run_loop = %name, processed = ctx.processed, "Run loop quit");
                break;
            }
            if ctx.shells.all_closed() {
                tracing::info!(run_loop = %name, "Every shell closed");
                scope.handle_application_exit();
                break;
            }
        }

        // Anything still queued is dropped unrun
        rx.close();
        CURRENT.with(|current| current.borrow_mut().take());
        Ok(())
    }

    fn shells(context: &mut QueueContext) -> &mut ShellSet {
        &mut context.shells
    }

    fn quit(context: &mut QueueContext) {
        context.quit();
    }
}
