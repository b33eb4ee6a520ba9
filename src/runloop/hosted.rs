// RunLoopHostedComponent - plugs a RunLoopThreadBridge into the host

use crate::error::LifecycleError;
use crate::host::HostedService;
use crate::runloop::bridge::RunLoopThreadBridge;
use crate::runloop::toolkit::RunLoopToolkit;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Starts the loop thread with the host and shuts it down when the host stops.
pub struct RunLoopHostedComponent<T: RunLoopToolkit> {
    bridge: Arc<RunLoopThreadBridge<T>>,
}

impl<T: RunLoopToolkit> RunLoopHostedComponent<T> {
    pub fn new(bridge: Arc<RunLoopThreadBridge<T>>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<RunLoopThreadBridge<T>> {
        &self.bridge
    }
}

#[async_trait]
impl<T: RunLoopToolkit> HostedService for RunLoopHostedComponent<T> {
    fn name(&self) -> &str {
        self.bridge.name()
    }

    async fn start(&self, _cancel: CancellationToken) -> Result<(), LifecycleError> {
        self.bridge.start()
    }

    /// Shuts a running loop down whether or not it is lifetime-linked.
    async fn stop(&self, cancel: CancellationToken) -> Result<(), LifecycleError> {
        let report = self.bridge.shutdown(cancel).await?;
        if !report.is_clean() {
            tracing::warn!(
                run_loop = self.bridge.name(),
                failures = report.failures.len(),
                "Run loop stopped with shell close failures"
            );
        }
        Ok(())
    }
}
