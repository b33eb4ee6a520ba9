//! Error types shared by the lifecycle components.

use thiserror::Error;

/// Errors surfaced by guards, bridges and hosted components.
///
/// Startup failures of retrying components never appear here: they are
/// recovered by retry and only logged.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Caller supplied configuration that can never work (empty guard name,
    /// missing required shell, zero queue capacity...). Never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The OS lock primitive backing a guard could not be created or locked.
    #[error("Exclusive resource '{name}' is unavailable: {reason}")]
    GuardUnavailable { name: String, reason: String },

    /// `start()` was called twice on the same run-loop bridge.
    #[error("Run loop '{0}' has already been started")]
    AlreadyStarted(String),

    /// The loop has no dispatcher yet, or its thread is gone.
    #[error("Run loop '{0}' is not accepting dispatched work")]
    LoopUnavailable(String),

    /// The toolkit refused to enqueue a callback.
    #[error("Run loop '{name}' rejected a dispatched callback: {reason}")]
    DispatchRejected { name: String, reason: String },

    /// A dispatched shutdown did not complete before the caller's deadline.
    #[error("Shutdown of '{0}' did not complete before the deadline")]
    ShutdownTimeout(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    /// Whether this error means "carry on without exclusivity is not allowed".
    pub fn is_guard_unavailable(&self) -> bool {
        matches!(self, Self::GuardUnavailable { .. })
    }
}

/// Failure to close one toolkit object during loop teardown.
///
/// Collected per object so one failing shell does not stop the others from
/// being closed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to close shell '{shell}': {message}")]
pub struct ShellCloseError {
    pub shell: String,
    pub message: String,
}

/// Convenience alias used across the crate.
pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LifecycleError::GuardUnavailable {
            name: "app".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Exclusive resource 'app' is unavailable: permission denied"
        );
        assert!(err.is_guard_unavailable());

        let err = LifecycleError::AlreadyStarted("ui".to_string());
        assert!(err.to_string().contains("already been started"));
        assert!(!err.is_guard_unavailable());
    }

    #[test]
    fn test_shell_close_error_display() {
        let err = ShellCloseError {
            shell: "main".to_string(),
            message: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to close shell 'main': busy");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: LifecycleError = io.into();
        assert!(matches!(err, LifecycleError::Io(_)));
    }
}
