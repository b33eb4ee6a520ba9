use crate::models::HostConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use ::config::{Config, Environment, File, FileFormat};
use std::fs;

/// Name of the host configuration file inside the configuration directory.
pub const HOST_CONFIG_FILE: &str = "loophost.yaml";

/// Prefix for environment overrides, e.g. `LOOPHOST__SINGLETON__MUTEX_ID`.
pub const ENV_PREFIX: &str = "LOOPHOST";

/// Configuration manager for loading and saving the host configuration.
///
/// Values are layered: defaults, then `loophost.yaml`, then `LOOPHOST__*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    host_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing `loophost.yaml`
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        // Create config directory if it doesn't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            host_config_path: config_dir.join(HOST_CONFIG_FILE),
            config_dir,
        })
    }

    /// Load the host configuration.
    ///
    /// # Returns
    /// The validated HostConfig, built from defaults when the file doesn't exist
    pub fn load_host_config(&self) -> Result<HostConfig> {
        let mut builder = Config::builder();

        if self.host_config_path.exists() {
            builder = builder.add_source(
                File::new(self.host_config_path.as_str(), FileFormat::Yaml).required(true),
            );
        } else {
            tracing::warn!(
                "Host config file not found at {}, using defaults",
                self.host_config_path
            );
        }

        let config: HostConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read host config: {}", self.host_config_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse host config: {}", self.host_config_path))?;

        config
            .validate()
            .with_context(|| format!("Invalid host config: {}", self.host_config_path))?;

        tracing::info!("Loaded host config from {}", self.host_config_path);
        Ok(config)
    }

    /// Save the host configuration file.
    ///
    /// # Arguments
    /// * `config` - The HostConfig to save
    pub fn save_host_config(&self, config: &HostConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize host config to YAML")?;

        fs::write(&self.host_config_path, yaml_string)
            .with_context(|| format!("Failed to write host config: {}", self.host_config_path))?;

        tracing::info!("Saved host config to {}", self.host_config_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Get the host configuration file path.
    pub fn host_config_path(&self) -> &Utf8Path {
        &self.host_config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_create_config_manager() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.host_config_path().ends_with(HOST_CONFIG_FILE));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();

        let loaded = manager.load_host_config().unwrap();
        assert_eq!(loaded.host.shutdown_timeout_ms, 5000);
        assert_eq!(loaded.run_loop.queue_capacity, 1024);
    }

    #[test]
    fn test_load_save_host_config() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut config = HostConfig::default();
        config.host.environment = "Staging".to_string();
        config.retry.max_attempts = Some(3);
        manager.save_host_config(&config).unwrap();

        let loaded = manager.load_host_config().unwrap();
        assert_eq!(loaded.host.environment, "Staging");
        assert_eq!(loaded.retry.max_attempts, Some(3));
    }

    #[test]
    fn test_invalid_file_rejected() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(
            manager.host_config_path(),
            "run_loop:\n  queue_capacity: 0\n",
        )
        .unwrap();

        let err = manager.load_host_config().unwrap_err();
        assert!(format!("{:#}", err).contains("queue_capacity"));
    }
}
