use crate::error::LifecycleError;
use crate::guard::GuardScope;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host configuration from loophost.yaml
///
/// Every section falls back to its defaults when absent, so an empty file (or
/// no file at all) yields a working configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host: HostSettings,
    pub singleton: SingletonSettings,
    pub run_loop: RunLoopSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Environment name handed to the "not first instance" callback
    pub environment: String,

    /// Deadline for stopping all hosted services
    pub shutdown_timeout_ms: u64,

    pub log_dir: String,

    pub debug_mode: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            environment: "Production".to_string(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            log_dir: "logs".to_string(),
            debug_mode: false,
        }
    }
}

impl HostSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Single-instance guard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingletonSettings {
    pub enabled: bool,

    /// Name of the exclusive resource
    pub mutex_id: String,

    pub scope: GuardScope,

    /// Overrides the directory the lock file is created in
    pub lock_dir: Option<String>,
}

impl Default for SingletonSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mutex_id: "loophost".to_string(),
            scope: GuardScope::Local,
            lock_dir: None,
        }
    }
}

/// Run-loop thread settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLoopSettings {
    pub enabled: bool,

    /// The loop exiting on its own stops the host
    pub lifetime_linked: bool,

    /// Fail `start()` when no shell factory is registered
    pub require_shell: bool,

    /// Bound of the dispatch queue
    pub queue_capacity: usize,

    pub thread_name: String,
}

impl Default for RunLoopSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lifetime_linked: true,
            require_shell: false,
            queue_capacity: default_queue_capacity(),
            thread_name: "loophost-loop".to_string(),
        }
    }
}

/// Retry settings for retrying lifecycle components
///
/// The defaults retry forever without delay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,

    pub backoff_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    1024
}

impl HostConfig {
    /// Reject settings that can never work.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.singleton.enabled && self.singleton.mutex_id.trim().is_empty() {
            return Err(LifecycleError::InvalidConfiguration(
                "singleton.mutex_id must not be empty".to_string(),
            ));
        }

        if self.run_loop.queue_capacity == 0 {
            return Err(LifecycleError::InvalidConfiguration(
                "run_loop.queue_capacity must be greater than zero".to_string(),
            ));
        }

        if self.run_loop.thread_name.trim().is_empty() {
            return Err(LifecycleError::InvalidConfiguration(
                "run_loop.thread_name must not be empty".to_string(),
            ));
        }

        if self.retry.max_attempts == Some(0) {
            return Err(LifecycleError::InvalidConfiguration(
                "retry.max_attempts must be at least 1 when set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.host.environment, "Production");
        assert_eq!(config.host.shutdown_timeout(), Duration::from_secs(5));
        assert!(config.singleton.enabled);
        assert_eq!(config.singleton.scope, GuardScope::Local);
        assert!(config.run_loop.lifetime_linked);
        assert_eq!(config.run_loop.queue_capacity, 1024);
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(config.retry.backoff_ms, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_mutex_id_rejected() {
        let mut config = HostConfig::default();
        config.singleton.mutex_id = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(LifecycleError::InvalidConfiguration(_))
        ));

        // Disabled singleton does not care about the name
        config.singleton.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let mut config = HostConfig::default();
        config.run_loop.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let mut config = HostConfig::default();
        config.retry.max_attempts = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "singleton:\n  mutex_id: other\n  scope: global\n";
        let config: HostConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.singleton.mutex_id, "other");
        assert_eq!(config.singleton.scope, GuardScope::Global);
        assert!(config.singleton.enabled);
        assert_eq!(config.host.environment, "Production");
    }
}
