// RetryingLifecycleComponent - hosted component with a self-healing start routine
//
// When the host reports "started", the component runs its start routine on a
// background task and keeps re-running it until it succeeds, the retry policy
// gives up, or the component's CleanupSet is disposed. The host's own start
// call never waits for any of this.

use crate::error::LifecycleError;
use crate::host::{HostLifetime, HostedService};
use crate::lifecycle::CleanupSet;
use crate::metrics::LifecycleMetrics;
use crate::models::RetrySettings;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Label of the retry-loop subscription inside a component's CleanupSet.
pub const RETRY_SUBSCRIPTION: &str = "retry-subscription";

/// How often and how fast a failing start routine is retried.
///
/// The default retries forever with no delay between attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up after this many attempts. `None` never gives up.
    pub max_attempts: Option<u32>,

    /// Delay between a failed attempt and the next one.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn limited(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff: Duration::from_millis(settings.backoff_ms),
        }
    }
}

/// Per-attempt context handed to [`LifecycleHooks::on_started`].
///
/// Resources added to [`resources`](Self::resources) are kept only if the
/// attempt succeeds; a failed attempt has them released before the retry.
pub struct StartScope {
    attempt: u32,
    resources: CleanupSet,
    cancel: CancellationToken,
}

impl StartScope {
    fn new(attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            attempt,
            resources: CleanupSet::new(),
            cancel,
        }
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn resources(&self) -> &CleanupSet {
        &self.resources
    }

    /// Cancelled when the component's CleanupSet is disposed.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Override points of a retrying component.
#[async_trait]
pub trait LifecycleHooks: Send + Sync + 'static {
    /// Start routine. An `Err` (or a panic) triggers a retry.
    async fn on_started(&self, scope: &StartScope) -> anyhow::Result<()> {
        let _ = scope;
        Ok(())
    }

    /// Host is stopping. The default disposes the component's resources.
    fn on_stopping(&self, resources: &CleanupSet) {
        resources.dispose();
    }

    /// Host has stopped.
    fn on_stopped(&self) {}

    /// The component was disposed, explicitly or by being dropped. Runs once,
    /// after its resources are released.
    fn on_disposed(&self) {}
}

/// Construction options for [`RetryingLifecycleComponent`].
#[derive(Default)]
pub struct RetryOptions {
    pub policy: RetryPolicy,
    pub metrics: Arc<LifecycleMetrics>,
}

struct RetryInner<H> {
    name: String,
    hooks: H,
    lifetime: Arc<HostLifetime>,
    policy: RetryPolicy,
    metrics: Arc<LifecycleMetrics>,
    resources: Mutex<Option<Arc<CleanupSet>>>,
    registered: AtomicBool,
    started: AtomicBool,
    disposed: AtomicBool,
}

/// Hosted component wrapping a [`LifecycleHooks`] implementation in automatic
/// retry, with its resources bound to the host lifecycle.
pub struct RetryingLifecycleComponent<H: LifecycleHooks> {
    inner: Arc<RetryInner<H>>,
}

impl<H: LifecycleHooks> RetryingLifecycleComponent<H> {
    pub fn new(name: impl Into<String>, hooks: H, lifetime: Arc<HostLifetime>) -> Self {
        Self::with_options(name, hooks, lifetime, RetryOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        hooks: H,
        lifetime: Arc<HostLifetime>,
        options: RetryOptions,
    ) -> Self {
        Self {
            inner: Arc::new(RetryInner {
                name: name.into(),
                hooks,
                lifetime,
                policy: options.policy,
                metrics: options.metrics,
                resources: Mutex::new(None),
                registered: AtomicBool::new(false),
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn hooks(&self) -> &H {
        &self.inner.hooks
    }

    /// The CleanupSet of the current run, once "started" has fired.
    pub fn resources(&self) -> Option<Arc<CleanupSet>> {
        self.inner.resources.lock().clone()
    }

    /// Whether a start routine has completed successfully.
    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Dispose the component. Idempotent; the CleanupSet is released once even
    /// when this races with the "stopping" notification.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<H: LifecycleHooks> Drop for RetryingLifecycleComponent<H> {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<H: LifecycleHooks> RetryInner<H> {
    fn begin(self: &Arc<Self>, runtime: &Handle) {
        if self.disposed.load(Ordering::SeqCst) {
            tracing::debug!(component = %self.name, "Component disposed, not starting");
            return;
        }

        let resources = Arc::new(CleanupSet::new());
        if let Some(previous) = self.resources.lock().replace(resources.clone()) {
            previous.dispose();
        }

        let cancel = CancellationToken::new();
        resources.add_token(RETRY_SUBSCRIPTION, cancel.clone());

        // dispose() may have run between the check above and the replace
        if self.disposed.load(Ordering::SeqCst) {
            resources.dispose();
            return;
        }

        tracing::debug!(component = %self.name, "Starting retry loop");
        let inner = self.clone();
        runtime.spawn(async move { inner.retry_loop(resources, cancel).await });
    }

    async fn retry_loop(self: Arc<Self>, resources: Arc<CleanupSet>, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(component = %self.name, attempt, "Retry loop cancelled");
                return;
            }

            attempt = attempt.saturating_add(1);
            self.metrics.record_start_attempt();
            let scope = StartScope::new(attempt, cancel.child_token());

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(component = %self.name, attempt, "Retry loop cancelled mid-attempt");
                    return;
                }
                outcome = AssertUnwindSafe(self.hooks.on_started(&scope)).catch_unwind() => outcome,
            };

            match outcome {
                Ok(Ok(())) => {
                    resources.absorb(&scope.resources);
                    self.started.store(true, Ordering::SeqCst);
                    self.metrics.record_start_completed();
                    tracing::info!(component = %self.name, attempt, "Start routine completed");
                    return;
                }
                Ok(Err(e)) => {
                    self.metrics.record_start_failure();
                    tracing::warn!(component = %self.name, attempt, error = %format!("{:#}", e), "Start routine failed");
                }
                Err(_) => {
                    self.metrics.record_start_failure();
                    tracing::error!(component = %self.name, attempt, "Start routine panicked");
                }
            }

            scope.resources.dispose();

            if self.policy.exhausted(attempt) {
                tracing::error!(component = %self.name, attempt, "Giving up on start routine");
                return;
            }

            if self.policy.backoff.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.policy.backoff) => {}
                }
            }
        }
    }

    fn stopping(&self) {
        let resources = self.resources.lock().clone();
        match resources {
            Some(resources) => self.hooks.on_stopping(&resources),
            None => self.hooks.on_stopping(&CleanupSet::new()),
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(resources) = self.resources.lock().take() {
            resources.dispose();
        }
        if catch_unwind(AssertUnwindSafe(|| self.hooks.on_disposed())).is_err() {
            tracing::error!(component = %self.name, "Dispose hook panicked");
        }
        tracing::debug!(component = %self.name, "Component disposed");
    }
}

#[async_trait]
impl<H: LifecycleHooks> HostedService for RetryingLifecycleComponent<H> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bind to the host's lifecycle phases and return immediately.
    async fn start(&self, _cancel: CancellationToken) -> Result<(), LifecycleError> {
        if self.inner.registered.swap(true, Ordering::SeqCst) {
            tracing::warn!(component = %self.inner.name, "Component already bound to host lifetime");
            return Ok(());
        }

        let runtime = Handle::current();
        let lifetime = &self.inner.lifetime;

        let inner = self.inner.clone();
        lifetime.on_started(move || inner.begin(&runtime));

        let inner = self.inner.clone();
        lifetime.on_stopping(move || inner.stopping());

        let inner = self.inner.clone();
        lifetime.on_stopped(move || inner.hooks.on_stopped());

        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> Result<(), LifecycleError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LifecyclePhase;
    use std::sync::atomic::AtomicU32;

    struct FailingUntil {
        succeed_on: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LifecycleHooks for FailingUntil {
        async fn on_started(&self, scope: &StartScope) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if scope.attempt() < self.succeed_on {
                anyhow::bail!("attempt {} failed", scope.attempt());
            }
            Ok(())
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = RetryPolicy::from(&RetrySettings {
            max_attempts: Some(3),
            backoff_ms: 250,
        });
        assert_eq!(policy, RetryPolicy::limited(3, Duration::from_millis(250)));
        assert!(policy.exhausted(3));
        assert!(!RetryPolicy::unbounded().exhausted(u32::MAX));
    }

    #[tokio::test]
    async fn test_start_returns_before_routine_runs() {
        let lifetime = Arc::new(HostLifetime::new("Test"));
        let component = RetryingLifecycleComponent::new(
            "late",
            FailingUntil {
                succeed_on: 1,
                calls: AtomicU32::new(0),
            },
            lifetime.clone(),
        );

        component.start(CancellationToken::new()).await.unwrap();
        assert!(component.resources().is_none());
        assert_eq!(component.hooks().calls.load(Ordering::SeqCst), 0);

        lifetime.notify(LifecyclePhase::Started);
        wait_until(|| component.has_started()).await;
        assert_eq!(component.hooks().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let lifetime = Arc::new(HostLifetime::new("Test"));
        let metrics = Arc::new(LifecycleMetrics::new());
        let component = RetryingLifecycleComponent::with_options(
            "flaky",
            FailingUntil {
                succeed_on: 5,
                calls: AtomicU32::new(0),
            },
            lifetime.clone(),
            RetryOptions {
                policy: RetryPolicy::unbounded(),
                metrics: metrics.clone(),
            },
        );

        component.start(CancellationToken::new()).await.unwrap();
        lifetime.notify(LifecyclePhase::Started);
        wait_until(|| component.has_started()).await;

        assert_eq!(component.hooks().calls.load(Ordering::SeqCst), 5);
        assert_eq!(metrics.start_attempts.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.start_failures.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let lifetime = Arc::new(HostLifetime::new("Test"));
        let component = RetryingLifecycleComponent::with_options(
            "hopeless",
            FailingUntil {
                succeed_on: u32::MAX,
                calls: AtomicU32::new(0),
            },
            lifetime.clone(),
            RetryOptions {
                policy: RetryPolicy::limited(3, Duration::from_millis(1)),
                ..Default::default()
            },
        );

        component.start(CancellationToken::new()).await.unwrap();
        lifetime.notify(LifecyclePhase::Started);
        wait_until(|| component.hooks().calls.load(Ordering::SeqCst) == 3).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(component.hooks().calls.load(Ordering::SeqCst), 3);
        assert!(!component.has_started());
    }

    #[derive(Default)]
    struct CountsDispose {
        disposed: Arc<AtomicU32>,
    }

    impl LifecycleHooks for CountsDispose {
        fn on_disposed(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dispose_hook_runs_once() {
        let disposed = Arc::new(AtomicU32::new(0));
        let component = RetryingLifecycleComponent::new(
            "counted",
            CountsDispose {
                disposed: disposed.clone(),
            },
            Arc::new(HostLifetime::new("Test")),
        );

        component.dispose();
        component.dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        drop(component);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        let dropped = RetryingLifecycleComponent::new(
            "dropped",
            CountsDispose::default(),
            Arc::new(HostLifetime::new("Test")),
        );
        let counter = dropped.hooks().disposed.clone();
        drop(dropped);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispose_before_started_skips_routine() {
        let lifetime = Arc::new(HostLifetime::new("Test"));
        let component = RetryingLifecycleComponent::new(
            "gone",
            FailingUntil {
                succeed_on: 1,
                calls: AtomicU32::new(0),
            },
            lifetime.clone(),
        );

        component.start(CancellationToken::new()).await.unwrap();
        component.dispose();
        lifetime.notify(LifecyclePhase::Started);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(component.is_disposed());
        assert!(component.resources().is_none());
        assert_eq!(component.hooks().calls.load(Ordering::SeqCst), 0);
    }
}
