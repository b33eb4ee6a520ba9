// Host runner - starts hosted services, waits for a stop request, stops them
//
// Startup runs services in registration order; shutdown runs them in reverse
// under a deadline token, then fires the "stopped" phase.

use crate::error::LifecycleError;
use crate::host::{HostLifetime, LifecyclePhase, ServiceRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default deadline for stopping all hosted services.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A component whose start and stop are driven by the [`Host`].
///
/// `start` must return quickly: long-running work belongs on a spawned task
/// or thread. `stop` receives a token cancelled when the host's shutdown
/// deadline elapses.
#[async_trait]
pub trait HostedService: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, cancel: CancellationToken) -> Result<(), LifecycleError>;

    async fn stop(&self, cancel: CancellationToken) -> Result<(), LifecycleError>;
}

/// Builder collecting the lifetime, registry and services of a [`Host`].
pub struct HostBuilder {
    lifetime: Arc<HostLifetime>,
    registry: Arc<ServiceRegistry>,
    services: Vec<Arc<dyn HostedService>>,
    shutdown_timeout: Duration,
}

impl HostBuilder {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            lifetime: Arc::new(HostLifetime::new(environment)),
            registry: Arc::new(ServiceRegistry::new()),
            services: Vec::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Lifetime handed to components at construction.
    pub fn lifetime(&self) -> &Arc<HostLifetime> {
        &self.lifetime
    }

    /// Registry components resolve capabilities from.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn add_service(mut self, service: Arc<dyn HostedService>) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> Host {
        Host {
            lifetime: self.lifetime,
            registry: self.registry,
            services: self.services,
            shutdown_timeout: self.shutdown_timeout,
            started: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }
}

/// Minimal generic host.
pub struct Host {
    lifetime: Arc<HostLifetime>,
    registry: Arc<ServiceRegistry>,
    services: Vec<Arc<dyn HostedService>>,
    shutdown_timeout: Duration,
    started: Mutex<Vec<Arc<dyn HostedService>>>,
    stopped: AtomicBool,
}

impl Host {
    pub fn builder(environment: impl Into<String>) -> HostBuilder {
        HostBuilder::new(environment)
    }

    pub fn lifetime(&self) -> &Arc<HostLifetime> {
        &self.lifetime
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Start every service in registration order, then fire "started".
    ///
    /// A stop requested during startup skips the remaining services and the
    /// "started" phase. A service start error requests a stop and is returned.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        tracing::info!(
            environment = self.lifetime.environment_name(),
            services = self.services.len(),
            "Starting host"
        );

        for service in &self.services {
            if self.lifetime.is_stop_requested() {
                tracing::warn!(
                    service = service.name(),
                    "Stop requested during startup, skipping remaining services"
                );
                return Ok(());
            }

            tracing::debug!(service = service.name(), "Starting hosted service");
            if let Err(e) = service.start(self.lifetime.stop_token().child_token()).await {
                tracing::error!(service = service.name(), error = %e, "Hosted service failed to start");
                self.lifetime.request_stop();
                return Err(e);
            }
            self.started.lock().push(service.clone());
        }

        if !self.lifetime.is_stop_requested() {
            self.lifetime.notify(LifecyclePhase::Started);
        }
        Ok(())
    }

    /// Fire "stopping", stop started services in reverse order, fire "stopped".
    ///
    /// Idempotent. Every service is stopped even if an earlier one fails; the
    /// first error is returned.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Host already stopped");
            return Ok(());
        }

        tracing::info!("Stopping host");
        self.lifetime.request_stop();
        self.lifetime.notify(LifecyclePhase::Stopping);

        let deadline = CancellationToken::new();
        let timer = {
            let deadline = deadline.clone();
            let timeout = self.shutdown_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!("Shutdown deadline of {:?} elapsed", timeout);
                deadline.cancel();
            })
        };

        let started = std::mem::take(&mut *self.started.lock());
        let mut first_error = None;
        for service in started.iter().rev() {
            tracing::debug!(service = service.name(), "Stopping hosted service");
            if let Err(e) = service.stop(deadline.clone()).await {
                tracing::warn!(service = service.name(), error = %e, "Hosted service failed to stop");
                first_error.get_or_insert(e);
            }
        }
        timer.abort();

        self.lifetime.notify(LifecyclePhase::Stopped);
        tracing::info!("Host stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Start, wait for a stop request, stop.
    pub async fn run(&self) -> Result<(), LifecycleError> {
        let start_result = self.start().await;
        if start_result.is_ok() {
            self.lifetime.wait_for_stop().await;
        }
        let stop_result = self.stop().await;
        start_result.and(stop_result)
    }
}
