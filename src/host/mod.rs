// Host module - the lifecycle collaborator the components plug into
//
// This module contains:
// - HostLifetime: three one-shot phases (started/stopping/stopped) and request_stop
// - ServiceRegistry: ordered dependency lookup by type
// - Host / HostedService: starts and stops components under a shutdown deadline

pub mod lifetime;
pub mod registry;
pub mod runner;

pub use lifetime::{HostLifetime, LifecyclePhase, LifecycleSignal, Listener};
pub use registry::ServiceRegistry;
pub use runner::{DEFAULT_SHUTDOWN_TIMEOUT, Host, HostBuilder, HostedService};
