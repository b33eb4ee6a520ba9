// RunLoopThreadBridge - runs a toolkit loop on its own thread
//
// Bridges two event loops:
// 1. The toolkit's blocking, thread-affine run loop
// 2. Tokio's multi-threaded runtime, where the host lives
//
// `start` spawns the loop thread and returns at once. `shutdown` marshals a
// close-everything callback onto the loop thread, waits for the loop to end
// and reaps the thread.

use crate::error::LifecycleError;
use crate::host::{HostLifetime, ServiceRegistry};
use crate::metrics::LifecycleMetrics;
use crate::models::RunLoopSettings;
use crate::runloop::context::LoopContext;
use crate::runloop::shell::{ShellFactory, ShellSet, ShutdownReport};
use crate::runloop::toolkit::{LoopInitializer, LoopScope, RunLoopToolkit};
use anyhow::Context as _;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// How the loop thread is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLoopOptions {
    pub thread_name: String,
    pub lifetime_linked: bool,
    pub require_shell: bool,
}

impl Default for RunLoopOptions {
    fn default() -> Self {
        Self::from(&RunLoopSettings::default())
    }
}

impl From<&RunLoopSettings> for RunLoopOptions {
    fn from(settings: &RunLoopSettings) -> Self {
        Self {
            thread_name: settings.thread_name.clone(),
            lifetime_linked: settings.lifetime_linked,
            require_shell: settings.require_shell,
        }
    }
}

/// Owns one toolkit loop and the thread it runs on.
pub struct RunLoopThreadBridge<T: RunLoopToolkit> {
    options: RunLoopOptions,
    context: Arc<LoopContext<T::Context>>,
    lifetime: Arc<HostLifetime>,
    registry: Arc<ServiceRegistry>,
    metrics: Arc<LifecycleMetrics>,
    toolkit: Mutex<Option<T>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<T: RunLoopToolkit> RunLoopThreadBridge<T> {
    pub fn new(
        toolkit: T,
        options: RunLoopOptions,
        lifetime: Arc<HostLifetime>,
        registry: Arc<ServiceRegistry>,
    ) -> Self {
        let context = Arc::new(LoopContext::new(
            options.thread_name.clone(),
            options.lifetime_linked,
        ));
        Self {
            options,
            context,
            lifetime,
            registry,
            metrics: Arc::new(LifecycleMetrics::new()),
            toolkit: Mutex::new(Some(toolkit)),
            thread: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<LifecycleMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.options.thread_name
    }

    pub fn context(&self) -> &Arc<LoopContext<T::Context>> {
        &self.context
    }

    pub fn is_running(&self) -> bool {
        self.context.is_running()
    }

    /// Spawn the loop thread. Returns without waiting for the loop to be ready.
    ///
    /// # Errors
    /// * `AlreadyStarted` on a second call
    /// * `InvalidConfiguration` if a shell is required and no factory is registered
    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut slot = self.toolkit.lock();
        if slot.is_none() {
            return Err(LifecycleError::AlreadyStarted(self.name().to_string()));
        }

        let factories = self.registry.resolve_all::<Arc<dyn ShellFactory>>();
        if self.options.require_shell && factories.is_empty() {
            return Err(LifecycleError::InvalidConfiguration(format!(
                "run loop '{}' requires a shell but no shell factory is registered",
                self.name()
            )));
        }
        let initializers = self
            .registry
            .resolve_all::<Arc<dyn LoopInitializer<T::Context>>>();

        let Some(toolkit) = slot.take() else {
            return Err(LifecycleError::AlreadyStarted(self.name().to_string()));
        };
        let scope = LoopScope::new(
            self.context.clone(),
            self.lifetime.clone(),
            self.metrics.clone(),
        );

        tracing::info!(
            run_loop = self.name(),
            shell_factories = factories.len(),
            initializers = initializers.len(),
            "Spawning run loop thread"
        );
        let handle = std::thread::Builder::new()
            .name(self.options.thread_name.clone())
            .spawn(move || run_loop_thread(toolkit, scope, factories, initializers))?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Run `callback` on the loop thread.
    pub fn dispatch<F>(&self, callback: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(&mut T::Context) + Send + 'static,
    {
        self.context.dispatch(callback)?;
        self.metrics.record_dispatch();
        Ok(())
    }

    /// Close every shell on the loop thread, quit the loop and reap the thread.
    ///
    /// A loop that was never started or has already exited is left alone. A
    /// loop still starting up is stopped before it runs. `cancel` is the
    /// caller's deadline: when it fires first this returns `ShutdownTimeout`.
    pub async fn shutdown(
        &self,
        cancel: CancellationToken,
    ) -> Result<ShutdownReport, LifecycleError> {
        if !self.context.is_running() {
            if self.context.has_exited() {
                tracing::debug!(run_loop = self.name(), "Run loop already exited");
                self.reap_thread().await;
                return Ok(ShutdownReport::default());
            }
            if self.thread.lock().is_none() {
                tracing::debug!(run_loop = self.name(), "Run loop never started, nothing to shut down");
                return Ok(ShutdownReport::default());
            }

            self.context.set_shutdown_requested(true);
            if self.context.cancel_before_running() {
                tracing::info!(run_loop = self.name(), "Run loop not ready yet, stopping it before it runs");
                self.wait_for_exit(&cancel).await?;
                self.reap_thread().await;
                return Ok(ShutdownReport::default());
            }
            if self.context.has_exited() {
                self.reap_thread().await;
                return Ok(ShutdownReport::default());
            }
            // Became ready in the meantime
        }

        self.context.set_shutdown_requested(true);
        let (reply_tx, reply_rx) = oneshot::channel();
        let submitted = self.context.dispatch(move |ctx: &mut T::Context| {
            let report = T::shells(ctx).close_all();
            T::quit(ctx);
            let _ = reply_tx.send(report);
        });
        if let Err(e) = submitted {
            // Let a later exit of the loop still count as the user's doing
            self.context.set_shutdown_requested(false);
            tracing::warn!(run_loop = self.name(), error = %e, "Failed to dispatch shutdown");
            return Err(e);
        }
        self.metrics.record_dispatch();
        tracing::info!(run_loop = self.name(), "Shutdown dispatched to run loop");

        let report = tokio::select! {
            biased;
            reply = reply_rx => match reply {
                Ok(report) => report,
                Err(_) => {
                    // Callback dropped unrun: the loop ended on its own first
                    tracing::debug!(run_loop = self.name(), "Run loop ended before the shutdown ran");
                    ShutdownReport::default()
                }
            },
            _ = cancel.cancelled() => {
                tracing::error!(run_loop = self.name(), "Run loop did not process the shutdown in time");
                return Err(LifecycleError::ShutdownTimeout(self.name().to_string()));
            }
        };

        if !report.is_clean() {
            self.metrics.record_shell_close_failures(report.failures.len());
            for failure in &report.failures {
                tracing::warn!(run_loop = self.name(), "{}", failure);
            }
        }

        self.wait_for_exit(&cancel).await?;
        self.reap_thread().await;

        tracing::info!(
            run_loop = self.name(),
            closed = report.closed,
            failures = report.failures.len(),
            "Run loop shut down"
        );
        Ok(report)
    }

    async fn wait_for_exit(&self, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        tokio::select! {
            biased;
            _ = self.context.wait_exited() => Ok(()),
            _ = cancel.cancelled() => {
                tracing::error!(run_loop = self.name(), "Run loop did not exit in time");
                Err(LifecycleError::ShutdownTimeout(self.name().to_string()))
            }
        }
    }

    async fn reap_thread(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => tracing::debug!(run_loop = self.name(), "Run loop thread joined"),
            Ok(Err(_)) => tracing::error!(run_loop = self.name(), "Run loop thread panicked"),
            Err(e) => tracing::warn!(run_loop = self.name(), "Failed to join run loop thread: {}", e),
        }
    }
}

fn run_loop_thread<T: RunLoopToolkit>(
    mut toolkit: T,
    scope: LoopScope<T::Context>,
    factories: Vec<Arc<dyn ShellFactory>>,
    initializers: Vec<Arc<dyn LoopInitializer<T::Context>>>,
) {
    let name = scope.context().name().to_string();
    tracing::debug!(run_loop = %name, "Run loop thread started");

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        drive(&mut toolkit, &scope, &factories, initializers)
    }));
    match outcome {
        Ok(Ok(())) => tracing::debug!(run_loop = %name, "Run loop returned"),
        Ok(Err(e)) => tracing::error!(run_loop = %name, "Run loop failed: {:#}", e),
        Err(_) => tracing::error!(run_loop = %name, "Run loop panicked"),
    }

    // However the loop ended, the host hears about it exactly once
    if !scope.exit_handled() {
        scope.handle_application_exit();
    }
    tracing::debug!(run_loop = %name, "Run loop thread terminated");
}

fn drive<T: RunLoopToolkit>(
    toolkit: &mut T,
    scope: &LoopScope<T::Context>,
    factories: &[Arc<dyn ShellFactory>],
    initializers: Vec<Arc<dyn LoopInitializer<T::Context>>>,
) -> anyhow::Result<()> {
    toolkit
        .pre_loop_start(scope)
        .context("Pre-loop setup failed")?;
    if scope.context().dispatcher().is_none() {
        anyhow::bail!("Pre-loop setup installed no dispatcher");
    }

    // Queued first, so they run before anything else reaches the loop
    for initializer in initializers {
        scope
            .context()
            .dispatch(move |ctx| initializer.initialize(ctx))
            .context("Failed to queue loop initializer")?;
    }

    let shells = factories
        .iter()
        .enumerate()
        .map(|(i, factory)| {
            factory
                .create()
                .with_context(|| format!("Shell factory #{} failed", i))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    tracing::debug!(
        run_loop = scope.context().name(),
        shells = shells.len(),
        "Shells created"
    );

    if scope.context().is_cancelled() {
        let report = ShellSet::new(shells).close_all();
        tracing::debug!(
            run_loop = scope.context().name(),
            closed = report.closed,
            "Shutdown arrived during setup, loop not started"
        );
        return Ok(());
    }

    toolkit.loop_start(scope, shells).context("Run loop failed")?;
    Ok(())
}
