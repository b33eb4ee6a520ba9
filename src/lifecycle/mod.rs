// Lifecycle module - hosted components with guaranteed cleanup
//
// This module contains:
// - CleanupSet: resources released together, exactly once
// - RetryingLifecycleComponent: start routine wrapped in automatic retry
// - SingletonLifetimeService: single-instance enforcement via ExclusiveResourceGuard

pub mod cleanup;
pub mod retrying;
pub mod singleton;

pub use cleanup::CleanupSet;
pub use retrying::{
    LifecycleHooks, RETRY_SUBSCRIPTION, RetryOptions, RetryPolicy, RetryingLifecycleComponent,
    StartScope,
};
pub use singleton::{
    NotFirstInstanceCallback, SingletonLifetimeService, SingletonOptions, SingletonState,
};
