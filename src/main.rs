//! loophost - headless demo host for the lifecycle components
//!
//! Main entry point for the `loophost` binary.
//!
//! # Overview
//!
//! The binary wires every component of the library into one [`Host`]:
//! - Single-instance guard ([`SingletonLifetimeService`])
//! - Headless run loop on a dedicated thread ([`QueueToolkit`] behind a
//!   [`RunLoopHostedComponent`])
//! - A retrying heartbeat component ([`RetryingLifecycleComponent`])
//!
//! The process uses a hybrid threading model:
//! - **Main thread**: blocks on the host until a stop is requested
//! - **Tokio workers**: host lifecycle, retry loops, heartbeat task
//! - **Loop thread**: the run loop, fed through its dispatcher
//!
//! # Execution Flow
//!
//! 1. Load `config/loophost.yaml` (defaults when absent, `LOOPHOST__*` overrides)
//! 2. Initialize logging -> `<log_dir>/loophost.<date>`
//! 3. Create tokio runtime
//! 4. Build and run the host; Ctrl-C or closing the last shell stops it
//! 5. Log metrics, shut the runtime down with a 5s timeout

use anyhow::{Context, Result};
use async_trait::async_trait;
use loophost::lifecycle::{RetryOptions, SingletonOptions};
use loophost::runloop::{HeadlessShell, LoopInitializer, QueueContext, Shell, ShellFactory};
use loophost::{
    APP_NAME, CleanupSet, ConfigManager, Host, HostConfig, LifecycleHooks, LifecycleMetrics,
    QueueToolkit, RetryPolicy, RetryingLifecycleComponent, RunLoopHostedComponent, RunLoopOptions,
    RunLoopThreadBridge, SingletonLifetimeService, StartScope, VERSION,
};
use std::sync::Arc;
use std::time::Duration;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically logs that the host is alive.
struct Heartbeat;

#[async_trait]
impl LifecycleHooks for Heartbeat {
    async fn on_started(&self, scope: &StartScope) -> Result<()> {
        let cancel = scope.cancellation().clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => tracing::debug!("Heartbeat"),
                }
            }
        });
        scope.resources().add_task("heartbeat", task);
        Ok(())
    }

    fn on_stopping(&self, resources: &CleanupSet) {
        tracing::info!("Heartbeat stopping, releasing {} resources", resources.len());
        resources.dispose();
    }
}

/// Main entry point for the loophost binary
///
/// # Errors
///
/// This function can fail if:
/// - The configuration file is invalid YAML or fails validation
/// - Logging initialization fails (disk space, permissions)
/// - Tokio runtime creation fails (system resources)
/// - A hosted service fails to start or stop
fn main() -> Result<()> {
    let config_manager = ConfigManager::new("config")?;
    let config = config_manager.load_host_config()?;

    let _log_guard = loophost::logging::setup_logging_with_console(
        &config.host.log_dir,
        APP_NAME,
        config.host.debug_mode,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::info!(
        "Loaded configuration from {} (environment: {})",
        config_manager.host_config_path(),
        config.host.environment
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("loophost-worker")
        .build()?;

    tracing::info!("Tokio runtime initialized with {} worker threads", 4);

    let metrics = Arc::new(LifecycleMetrics::new());
    let result = runtime.block_on(run_host(&config, metrics.clone()));

    metrics.log_summary();

    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Application shutdown complete");

    result.map_err(|e| {
        tracing::error!("Host error: {:#}", e);
        e
    })
}

async fn run_host(config: &HostConfig, metrics: Arc<LifecycleMetrics>) -> Result<()> {
    let mut builder =
        Host::builder(config.host.environment.clone()).shutdown_timeout(config.host.shutdown_timeout());
    let lifetime = builder.lifetime().clone();
    let registry = builder.registry().clone();

    if config.singleton.enabled {
        let singleton =
            SingletonLifetimeService::new(SingletonOptions::from(&config.singleton), lifetime.clone())
                .with_metrics(metrics.clone())
                .on_not_first_instance(|environment| {
                    tracing::warn!("{} is already running in {}", APP_NAME, environment);
                });
        builder = builder.add_service(Arc::new(singleton));
    }

    if config.run_loop.enabled {
        registry.register::<Arc<dyn ShellFactory>>(Arc::new(|| -> Result<Box<dyn Shell>> {
            Ok(Box::new(HeadlessShell::new("main")))
        }));
        registry.register::<Arc<dyn LoopInitializer<QueueContext>>>(Arc::new(
            |ctx: &mut QueueContext| {
                tracing::info!(shells = ?ctx.shells().names(), "Run loop initialized");
            },
        ));

        let bridge = RunLoopThreadBridge::new(
            QueueToolkit::new(config.run_loop.queue_capacity),
            RunLoopOptions::from(&config.run_loop),
            lifetime.clone(),
            registry.clone(),
        )
        .with_metrics(metrics.clone());
        builder = builder.add_service(Arc::new(RunLoopHostedComponent::new(Arc::new(bridge))));
    }

    let heartbeat = RetryingLifecycleComponent::with_options(
        "heartbeat",
        Heartbeat,
        lifetime.clone(),
        RetryOptions {
            policy: RetryPolicy::from(&config.retry),
            metrics: metrics.clone(),
        },
    );
    builder = builder.add_service(Arc::new(heartbeat));

    let host = builder.build();

    let ctrl_c_lifetime = lifetime.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping host");
            ctrl_c_lifetime.request_stop();
        }
    });

    host.run().await.context("Host failed")
}
