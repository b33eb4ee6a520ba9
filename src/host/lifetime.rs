// Host lifetime - one-shot lifecycle notifications and the stop request
//
// Components never drive the host directly. They register listeners on the
// three phases and call `request_stop()`; the host decides when phases fire.

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio_util::sync::CancellationToken;

/// A listener invoked once when its phase fires.
pub type Listener = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle phases a listener can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Started,
    Stopping,
    Stopped,
}

impl LifecyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

struct SignalState {
    fired: bool,
    listeners: Vec<Listener>,
}

/// One-shot, multi-listener notification.
///
/// Listeners registered before [`fire`](Self::fire) run in registration order
/// when it fires; a listener registered afterwards runs immediately. A
/// panicking listener is logged and does not prevent the others from running.
pub struct LifecycleSignal {
    phase: LifecyclePhase,
    state: Mutex<SignalState>,
}

impl LifecycleSignal {
    pub fn new(phase: LifecyclePhase) -> Self {
        Self {
            phase,
            state: Mutex::new(SignalState {
                fired: false,
                listeners: Vec::new(),
            }),
        }
    }

    /// Register a listener.
    pub fn register<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.fired {
            drop(state);
            tracing::debug!(
                phase = self.phase.as_str(),
                "Phase already fired, running late listener immediately"
            );
            invoke(self.phase, 0, Box::new(listener));
            return;
        }
        state.listeners.push(Box::new(listener));
    }

    /// Fire the signal. Returns `false` if it had already fired.
    pub fn fire(&self) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            if state.fired {
                return false;
            }
            state.fired = true;
            std::mem::take(&mut state.listeners)
        };

        tracing::debug!(
            phase = self.phase.as_str(),
            listeners = listeners.len(),
            "Firing lifecycle phase"
        );

        for (index, listener) in listeners.into_iter().enumerate() {
            invoke(self.phase, index, listener);
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Number of listeners waiting for the phase.
    pub fn pending(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

fn invoke(phase: LifecyclePhase, index: usize, listener: Listener) {
    if catch_unwind(AssertUnwindSafe(listener)).is_err() {
        tracing::error!(
            phase = phase.as_str(),
            index,
            "Lifecycle listener panicked; continuing with remaining listeners"
        );
    }
}

/// The host's lifecycle signal set.
///
/// Shared via `Arc` between the host and every component that needs to react
/// to lifecycle phases or ask the host to stop.
pub struct HostLifetime {
    environment: String,
    started: LifecycleSignal,
    stopping: LifecycleSignal,
    stopped: LifecycleSignal,
    stop_requested: CancellationToken,
}

impl HostLifetime {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            started: LifecycleSignal::new(LifecyclePhase::Started),
            stopping: LifecycleSignal::new(LifecyclePhase::Stopping),
            stopped: LifecycleSignal::new(LifecyclePhase::Stopped),
            stop_requested: CancellationToken::new(),
        }
    }

    /// Environment name (e.g. "Production").
    pub fn environment_name(&self) -> &str {
        &self.environment
    }

    pub fn on_started<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.started.register(listener);
    }

    pub fn on_stopping<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stopping.register(listener);
    }

    pub fn on_stopped<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stopped.register(listener);
    }

    /// Ask the host to stop. Idempotent and callable from any thread.
    pub fn request_stop(&self) {
        if !self.stop_requested.is_cancelled() {
            tracing::info!("Host stop requested");
            self.stop_requested.cancel();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.is_cancelled()
    }

    /// Resolves once a stop has been requested.
    pub async fn wait_for_stop(&self) {
        self.stop_requested.cancelled().await;
    }

    /// Token cancelled when a stop is requested.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_requested.clone()
    }

    pub fn has_fired(&self, phase: LifecyclePhase) -> bool {
        self.signal(phase).has_fired()
    }

    /// Fire a phase. Only the host calls this; returns `false` on repeats.
    pub fn notify(&self, phase: LifecyclePhase) -> bool {
        let fired = self.signal(phase).fire();
        if fired {
            tracing::info!(phase = phase.as_str(), "Host lifecycle phase reached");
        }
        fired
    }

    fn signal(&self, phase: LifecyclePhase) -> &LifecycleSignal {
        match phase {
            LifecyclePhase::Started => &self.started,
            LifecyclePhase::Stopping => &self.stopping,
            LifecyclePhase::Stopped => &self.stopped,
        }
    }
}

impl Default for HostLifetime {
    fn default() -> Self {
        Self::new("Production")
    }
}
