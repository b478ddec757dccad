//! Host configuration management

use anyhow::{Context, Result, anyhow};
use driver::ManagerOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub host: HostSettings,
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    pub log_level: String,
}

/// Attach policy and interface binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Refuse devices that negotiated an unknown bus speed
    #[serde(default)]
    pub reject_unknown_speed: bool,
    /// Detach a kernel driver bound to an interface before claiming it
    #[serde(default = "DriverSettings::default_detach_kernel_driver")]
    pub detach_kernel_driver: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            reject_unknown_speed: false,
            detach_kernel_driver: Self::default_detach_kernel_driver(),
        }
    }
}

impl DriverSettings {
    fn default_detach_kernel_driver() -> bool {
        true
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            reject_unknown_speed: self.reject_unknown_speed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Upper bound on one libusb event wait, in milliseconds
    #[serde(default = "UsbSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval(),
        }
    }
}

impl UsbSettings {
    fn default_poll_interval() -> u64 {
        100
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: HostSettings {
                log_level: "info".to_string(),
            },
            driver: DriverSettings::default(),
            usb: UsbSettings::default(),
        }
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/ubertooth-host/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ubertooth-host").join("host.toml")
        } else {
            PathBuf::from(".config/ubertooth-host/host.toml")
        }
    }

    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.usb.poll_interval_ms == 0 || self.usb.poll_interval_ms > 10_000 {
            return Err(anyhow!(
                "Invalid poll_interval_ms {}, must be between 1 and 10000",
                self.usb.poll_interval_ms
            ));
        }

        Ok(())
    }
}

/// Load from a user-supplied path, expanding `~`
pub fn load_config(path: &str) -> Result<HostConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    HostConfig::load(Some(path_buf))
}
