// Lifecycle metrics module
//
// Lightweight counters shared by the hosted components

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle counters
///
/// Uses atomic operations for thread-safe tracking without locks. Components
/// record into a shared `Arc<LifecycleMetrics>`; the binary logs a summary on exit.
#[derive(Debug)]
pub struct LifecycleMetrics {
    /// Number of start routine invocations (including retries)
    pub start_attempts: AtomicU64,

    /// Number of start routine invocations that failed or panicked
    pub start_failures: AtomicU64,

    /// Number of start routines that eventually succeeded
    pub starts_completed: AtomicU64,

    /// Number of guards acquired
    pub guards_acquired: AtomicU64,

    /// Number of guard acquisitions rejected (held elsewhere or unavailable)
    pub guards_rejected: AtomicU64,

    /// Number of callbacks accepted by a loop dispatcher
    pub dispatched_callbacks: AtomicU64,

    /// Number of shells that failed to close during loop teardown
    pub shell_close_failures: AtomicU64,

    /// Number of run loops that exited on their own
    pub application_exits: AtomicU64,

    /// Creation time
    start_time: Instant,
}

impl LifecycleMetrics {
    /// Create a new LifecycleMetrics instance
    pub fn new() -> Self {
        Self {
            start_attempts: AtomicU64::new(0),
            start_failures: AtomicU64::new(0),
            starts_completed: AtomicU64::new(0),
            guards_acquired: AtomicU64::new(0),
            guards_rejected: AtomicU64::new(0),
            dispatched_callbacks: AtomicU64::new(0),
            shell_close_failures: AtomicU64::new(0),
            application_exits: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_start_attempt(&self) {
        self.start_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start_failure(&self) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start_completed(&self) {
        self.starts_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_guard_acquired(&self) {
        self.guards_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_guard_rejected(&self) {
        self.guards_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shell_close_failures(&self, count: usize) {
        self.shell_close_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_application_exit(&self) {
        self.application_exits.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average number of attempts each completed start routine needed
    pub fn avg_attempts_per_start(&self) -> f64 {
        let attempts = self.start_attempts.load(Ordering::Relaxed);
        let completed = self.starts_completed.load(Ordering::Relaxed);
        if completed > 0 {
            attempts as f64 / completed as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Lifecycle Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Start routines: {} attempts, {} failures, {} completed (avg {:.2} attempts)",
            self.start_attempts.load(Ordering::Relaxed),
            self.start_failures.load(Ordering::Relaxed),
            self.starts_completed.load(Ordering::Relaxed),
            self.avg_attempts_per_start()
        );
        tracing::info!(
            "Guards: {} acquired, {} rejected",
            self.guards_acquired.load(Ordering::Relaxed),
            self.guards_rejected.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Run loops: {} callbacks dispatched, {} shell close failures, {} application exits",
            self.dispatched_callbacks.load(Ordering::Relaxed),
            self.shell_close_failures.load(Ordering::Relaxed),
            self.application_exits.load(Ordering::Relaxed)
        );
    }
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}
