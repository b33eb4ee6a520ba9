// loophost - lifecycle components for hosted applications
//
// This is the library crate: exclusive resource guards, single-instance
// enforcement, retrying startup with guaranteed cleanup, and hosting of a
// thread-affine UI run loop next to the async host.
// The binary crate (main.rs) runs a headless demo host.

pub mod config;
pub mod error;
pub mod guard;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod runloop;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::{LifecycleError, ShellCloseError};
pub use guard::{ExclusiveResourceGuard, GuardScope};
pub use host::{Host, HostBuilder, HostLifetime, HostedService, LifecyclePhase, ServiceRegistry};
pub use lifecycle::{
    CleanupSet, LifecycleHooks, RetryPolicy, RetryingLifecycleComponent, SingletonLifetimeService,
    StartScope,
};
pub use metrics::LifecycleMetrics;
pub use models::HostConfig;
pub use runloop::{
    QueueToolkit, RunLoopHostedComponent, RunLoopOptions, RunLoopThreadBridge, RunLoopToolkit,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
