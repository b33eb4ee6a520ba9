// SingletonLifetimeService - only one running instance per guard name
//
// Acquires an ExclusiveResourceGuard when the host starts. A second instance
// gets a warning, an optional callback, and a host stop request instead of
// an error.

use crate::error::LifecycleError;
use crate::guard::{ExclusiveResourceGuard, GuardScope};
use crate::host::{HostLifetime, HostedService};
use crate::metrics::LifecycleMetrics;
use crate::models::SingletonSettings;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback invoked with the environment name when another instance holds the guard.
pub type NotFirstInstanceCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// `Idle -> Acquiring -> {Holding, Rejected} -> Released`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingletonState {
    Idle,
    Acquiring,
    Holding,
    Rejected,
    Released,
}

/// Which resource to guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingletonOptions {
    pub mutex_id: String,
    pub scope: GuardScope,
    /// Lock directory; `None` uses the scope's default.
    pub lock_dir: Option<Utf8PathBuf>,
}

impl SingletonOptions {
    pub fn new(mutex_id: impl Into<String>, scope: GuardScope) -> Self {
        Self {
            mutex_id: mutex_id.into(),
            scope,
            lock_dir: None,
        }
    }

    pub fn with_lock_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }
}

impl From<&SingletonSettings> for SingletonOptions {
    fn from(settings: &SingletonSettings) -> Self {
        Self {
            mutex_id: settings.mutex_id.clone(),
            scope: settings.scope,
            lock_dir: settings.lock_dir.as_ref().map(Utf8PathBuf::from),
        }
    }
}

enum RejectCause {
    HeldElsewhere,
    GuardUnavailable(LifecycleError),
}

struct SingletonInner {
    guard: Mutex<Option<ExclusiveResourceGuard>>,
    state: Mutex<SingletonState>,
}

impl SingletonInner {
    fn release(&self) {
        if let Some(guard) = self.guard.lock().take() {
            guard.release();
            tracing::info!(mutex_id = guard.name(), "Single-instance guard released");
        }
        let mut state = self.state.lock();
        if matches!(*state, SingletonState::Holding | SingletonState::Rejected) {
            *state = SingletonState::Released;
        }
    }
}

/// Hosted service allowing only one running instance.
pub struct SingletonLifetimeService {
    options: SingletonOptions,
    lifetime: Arc<HostLifetime>,
    on_not_first_instance: Option<NotFirstInstanceCallback>,
    metrics: Arc<LifecycleMetrics>,
    inner: Arc<SingletonInner>,
}

impl SingletonLifetimeService {
    pub fn new(options: SingletonOptions, lifetime: Arc<HostLifetime>) -> Self {
        Self {
            options,
            lifetime,
            on_not_first_instance: None,
            metrics: Arc::new(LifecycleMetrics::new()),
            inner: Arc::new(SingletonInner {
                guard: Mutex::new(None),
                state: Mutex::new(SingletonState::Idle),
            }),
        }
    }

    /// Called with the environment name when this is not the first instance.
    pub fn on_not_first_instance<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_not_first_instance = Some(Arc::new(callback));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LifecycleMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> SingletonState {
        *self.inner.state.lock()
    }

    /// Whether this instance currently holds the guard.
    pub fn is_holding(&self) -> bool {
        self.inner
            .guard
            .lock()
            .as_ref()
            .is_some_and(ExclusiveResourceGuard::is_locked)
    }

    fn acquire(&self) -> Result<ExclusiveResourceGuard, LifecycleError> {
        match &self.options.lock_dir {
            Some(dir) => {
                ExclusiveResourceGuard::acquire_in(dir, &self.options.mutex_id, self.options.scope)
            }
            None => ExclusiveResourceGuard::acquire(&self.options.mutex_id, self.options.scope),
        }
    }

    fn reject(&self, cause: RejectCause) {
        *self.inner.state.lock() = SingletonState::Rejected;
        self.metrics.record_guard_rejected();
        match cause {
            RejectCause::HeldElsewhere => tracing::warn!(
                mutex_id = %self.options.mutex_id,
                scope = %self.options.scope,
                "Another instance is already running, stopping"
            ),
            RejectCause::GuardUnavailable(error) => tracing::error!(
                mutex_id = %self.options.mutex_id,
                scope = %self.options.scope,
                error = %error,
                "Single-instance guard unavailable (fail closed), stopping"
            ),
        }

        if let Some(callback) = &self.on_not_first_instance {
            let environment = self.lifetime.environment_name();
            if catch_unwind(AssertUnwindSafe(|| callback(environment))).is_err() {
                tracing::error!("Not-first-instance callback panicked");
            }
        }

        self.lifetime.request_stop();
    }
}

#[async_trait]
impl HostedService for SingletonLifetimeService {
    fn name(&self) -> &str {
        "singleton"
    }

    async fn start(&self, _cancel: CancellationToken) -> Result<(), LifecycleError> {
        *self.inner.state.lock() = SingletonState::Acquiring;

        let guard = match self.acquire() {
            Ok(guard) => guard,
            Err(e @ LifecycleError::InvalidConfiguration(_)) => {
                *self.inner.state.lock() = SingletonState::Idle;
                return Err(e);
            }
            Err(e) => {
                // Fail closed: no proof of exclusivity means no startup
                self.reject(RejectCause::GuardUnavailable(e));
                return Ok(());
            }
        };

        if !guard.is_locked() {
            self.reject(RejectCause::HeldElsewhere);
            return Ok(());
        }

        tracing::info!(
            mutex_id = %self.options.mutex_id,
            scope = %self.options.scope,
            path = %guard.path(),
            "Single-instance guard acquired"
        );
        self.metrics.record_guard_acquired();
        *self.inner.guard.lock() = Some(guard);
        *self.inner.state.lock() = SingletonState::Holding;

        let inner = self.inner.clone();
        self.lifetime.on_stopping(move || inner.release());
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> Result<(), LifecycleError> {
        self.inner.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LifecyclePhase;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn options(dir: &TempDir, name: &str) -> SingletonOptions {
        let dir = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        SingletonOptions::new(name, GuardScope::Local).with_lock_dir(dir)
    }

    #[tokio::test]
    async fn test_first_instance_holds_until_stopping() {
        let tmp = TempDir::new().unwrap();
        let lifetime = Arc::new(HostLifetime::new("Test"));
        let service = SingletonLifetimeService::new(options(&tmp, "app"), lifetime.clone());
        assert_eq!(service.state(), SingletonState::Idle);

        service.start(CancellationToken::new()).await.unwrap();
        assert_eq!(service.state(), SingletonState::Holding);
        assert!(service.is_holding());
        assert!(!lifetime.is_stop_requested());

        lifetime.notify(LifecyclePhase::Stopping);
        assert_eq!(service.state(), SingletonState::Released);
        assert!(!service.is_holding());
    }

    #[tokio::test]
    async fn test_second_instance_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let first_lifetime = Arc::new(HostLifetime::new("Test"));
        let first = SingletonLifetimeService::new(options(&tmp, "app"), first_lifetime);
        first.start(CancellationToken::new()).await.unwrap();

        let seen = Arc::new(Mutex::new(None));
        let lifetime = Arc::new(HostLifetime::new("Staging"));
        let second = {
            let seen = seen.clone();
            SingletonLifetimeService::new(options(&tmp, "app"), lifetime.clone())
                .on_not_first_instance(move |env| *seen.lock() = Some(env.to_string()))
        };

        second.start(CancellationToken::new()).await.unwrap();
        assert_eq!(second.state(), SingletonState::Rejected);
        assert!(lifetime.is_stop_requested());
        assert_eq!(seen.lock().as_deref(), Some("Staging"));
    }

    #[tokio::test]
    async fn test_panicking_callback_still_stops_host() {
        let tmp = TempDir::new().unwrap();
        let first = SingletonLifetimeService::new(
            options(&tmp, "app"),
            Arc::new(HostLifetime::new("Test")),
        );
        first.start(CancellationToken::new()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let lifetime = Arc::new(HostLifetime::new("Test"));
        let second = {
            let calls = calls.clone();
            SingletonLifetimeService::new(options(&tmp, "app"), lifetime.clone())
                .on_not_first_instance(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    panic!("callback failure");
                })
        };

        assert!(second.start(CancellationToken::new()).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lifetime.is_stop_requested());
    }

    #[tokio::test]
    async fn test_unusable_lock_dir_fails_closed() {
        let tmp = TempDir::new().unwrap();
        let blocker = Utf8PathBuf::try_from(tmp.path().join("not-a-dir")).unwrap();
        std::fs::write(&blocker, b"").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(LifecycleMetrics::new());
        let lifetime = Arc::new(HostLifetime::new("Test"));
        let service = {
            let calls = calls.clone();
            SingletonLifetimeService::new(
                SingletonOptions::new("app", GuardScope::Local).with_lock_dir(blocker),
                lifetime.clone(),
            )
            .with_metrics(metrics.clone())
            .on_not_first_instance(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(service.start(CancellationToken::new()).await.is_ok());
        assert_eq!(service.state(), SingletonState::Rejected);
        assert!(!service.is_holding());
        assert!(lifetime.is_stop_requested());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.guards_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_empty_name_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let lifetime = Arc::new(HostLifetime::new("Test"));
        let service = SingletonLifetimeService::new(options(&tmp, ""), lifetime.clone());

        let err = service.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidConfiguration(_)));
        assert!(!lifetime.is_stop_requested());
    }

    #[tokio::test]
    async fn test_stop_releases_for_next_instance() {
        let tmp = TempDir::new().unwrap();
        let first = SingletonLifetimeService::new(
            options(&tmp, "app"),
            Arc::new(HostLifetime::new("Test")),
        );
        first.start(CancellationToken::new()).await.unwrap();
        first.stop(CancellationToken::new()).await.unwrap();
        first.stop(CancellationToken::new()).await.unwrap();

        let lifetime = Arc::new(HostLifetime::new("Test"));
        let next = SingletonLifetimeService::new(options(&tmp, "app"), lifetime.clone());
        next.start(CancellationToken::new()).await.unwrap();
        assert_eq!(next.state(), SingletonState::Holding);
        assert!(!lifetime.is_stop_requested());
    }
}
