// LoopContext - state shared between a run-loop thread and the host
//
// The loop thread writes the running flag (on at readiness, off at exit); host
// threads read it to decide whether a shutdown needs dispatching. Everything
// here is atomic or write-once.

use crate::error::LifecycleError;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

/// Work marshalled onto a loop thread. Receives the toolkit's loop-side state.
pub type LoopCallback<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// Capability to run a callback on the thread that owns a run loop.
///
/// Callbacks run in submission order. `submit` is callable from any thread.
pub trait Dispatcher<C>: Send + Sync {
    fn submit(&self, callback: LoopCallback<C>) -> Result<(), LifecycleError>;
}

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const EXITED: u8 = 2;
const CANCELLED: u8 = 3;

/// Per-loop shared state.
///
/// `is_running` goes false -> true once (readiness) and true -> false once
/// (exit). A loop that fails before readiness goes straight to exited and is
/// never observed running. A loop cancelled before readiness refuses to run.
pub struct LoopContext<C: 'static> {
    name: String,
    lifetime_linked: AtomicBool,
    phase: AtomicU8,
    shutdown_requested: AtomicBool,
    dispatcher: OnceLock<Arc<dyn Dispatcher<C>>>,
    exited: watch::Sender<bool>,
}

impl<C: 'static> LoopContext<C> {
    pub fn new(name: impl Into<String>, lifetime_linked: bool) -> Self {
        let (exited, _) = watch::channel(false);
        Self {
            name: name.into(),
            lifetime_linked: AtomicBool::new(lifetime_linked),
            phase: AtomicU8::new(NOT_STARTED),
            shutdown_requested: AtomicBool::new(false),
            dispatcher: OnceLock::new(),
            exited,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True between the readiness signal and loop exit.
    pub fn is_running(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == RUNNING
    }

    /// True once the loop thread has finished (or failed to start).
    pub fn has_exited(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == EXITED
    }

    pub fn is_lifetime_linked(&self) -> bool {
        self.lifetime_linked.load(Ordering::SeqCst)
    }

    pub fn set_lifetime_linked(&self, linked: bool) {
        self.lifetime_linked.store(linked, Ordering::SeqCst);
    }

    /// True if a shutdown arrived before the loop became ready.
    pub fn is_cancelled(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == CANCELLED
    }

    /// Whether the host asked this loop to shut down.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn dispatcher(&self) -> Option<Arc<dyn Dispatcher<C>>> {
        self.dispatcher.get().cloned()
    }

    /// Run `callback` on the loop thread.
    pub fn dispatch<F>(&self, callback: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let dispatcher = self
            .dispatcher()
            .ok_or_else(|| LifecycleError::LoopUnavailable(self.name.clone()))?;
        dispatcher.submit(Box::new(callback))
    }

    /// Resolves once the loop has exited.
    pub async fn wait_exited(&self) {
        let mut rx = self.exited.subscribe();
        // The sender lives as long as self, so this only ends on `true`
        let _ = rx.wait_for(|exited| *exited).await;
    }

    /// Returns `false` if a dispatcher was already installed.
    pub(crate) fn install_dispatcher(&self, dispatcher: Arc<dyn Dispatcher<C>>) -> bool {
        self.dispatcher.set(dispatcher).is_ok()
    }

    /// Readiness. Returns `false` if the loop already ran or exited.
    pub(crate) fn mark_running(&self) -> bool {
        self.phase
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Stop a loop that is not ready yet from ever running. Returns `false`
    /// once the loop is running or has exited.
    pub(crate) fn cancel_before_running(&self) -> bool {
        self.phase
            .compare_exchange(NOT_STARTED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Exit. Returns `true` if the loop was running.
    pub(crate) fn mark_exited(&self) -> bool {
        let previous = self.phase.swap(EXITED, Ordering::SeqCst);
        self.exited.send_replace(true);
        previous == RUNNING
    }

    pub(crate) fn set_shutdown_requested(&self, requested: bool) {
        self.shutdown_requested.store(requested, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_running_transitions_once() {
        let context: LoopContext<()> = LoopContext::new("ui", true);
        assert!(!context.is_running());
        assert!(!context.has_exited());

        assert!(context.mark_running());
        assert!(context.is_running());
        assert!(!context.mark_running());

        assert!(context.mark_exited());
        assert!(!context.is_running());
        assert!(context.has_exited());

        // No way back
        assert!(!context.mark_running());
        assert!(!context.mark_exited());
        assert!(!context.is_running());
    }

    #[test]
    fn test_exit_before_running_is_never_running() {
        let context: LoopContext<()> = LoopContext::new("ui", false);
        assert!(!context.mark_exited());
        assert!(!context.mark_running());
        assert!(!context.is_running());
        assert!(!context.is_lifetime_linked());
    }

    #[test]
    fn test_cancel_before_running_blocks_readiness() {
        let context: LoopContext<()> = LoopContext::new("ui", true);
        assert!(context.cancel_before_running());
        assert!(context.is_cancelled());
        assert!(!context.mark_running());
        assert!(!context.is_running());

        assert!(!context.mark_exited());
        assert!(context.has_exited());
        assert!(!context.cancel_before_running());

        let running: LoopContext<()> = LoopContext::new("ui", true);
        running.mark_running();
        assert!(!running.cancel_before_running());
        assert!(running.is_running());
    }

    #[test]
    fn test_dispatch_without_dispatcher() {
        let context: LoopContext<u32> = LoopContext::new("ui", true);
        let err = context.dispatch(|n| *n += 1).unwrap_err();
        assert!(matches!(err, LifecycleError::LoopUnavailable(name) if name == "ui"));
    }

    #[tokio::test]
    async fn test_wait_exited() {
        let context = Arc::new(LoopContext::<()>::new("ui", true));
        context.mark_running();

        let c = context.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            c.mark_exited();
        });

        tokio::time::timeout(Duration::from_secs(1), context.wait_exited())
            .await
            .expect("exit not observed");

        // Already exited resolves immediately
        tokio::time::timeout(Duration::from_millis(50), context.wait_exited())
            .await
            .expect("exit not observed");
    }
}
