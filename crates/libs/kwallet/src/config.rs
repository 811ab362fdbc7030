use std::fs;
use std::path::Path;
use std::time::Duration;

use kwallet_bus::{CallConfig, RouterConfig, Target, KWALLET_INTERFACE};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const KWALLETD5_SERVICE: &str = "org.kde.kwalletd5";
pub const KWALLETD5_PATH: &str = "/modules/kwalletd5";
pub const KWALLETD6_SERVICE: &str = "org.kde.kwalletd6";
pub const KWALLETD6_PATH: &str = "/modules/kwalletd6";

/// Where kwalletd lives and how long to wait for it.
///
/// Every field has a default, so an empty TOML document yields the
/// kwalletd5 preset:
///
/// ```toml
/// service = "org.kde.kwalletd6"
/// object_path = "/modules/kwalletd6"
/// call_timeout_ms = 5000
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WalletConfig {
    pub service: String,
    pub object_path: String,
    pub interface: String,
    pub call_timeout_ms: u64,
    pub await_timeout_ms: u64,
    pub history_capacity: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self::kwalletd5()
    }
}

impl WalletConfig {
    pub fn kwalletd5() -> Self {
        Self::preset(KWALLETD5_SERVICE, KWALLETD5_PATH)
    }

    pub fn kwalletd6() -> Self {
        Self::preset(KWALLETD6_SERVICE, KWALLETD6_PATH)
    }

    fn preset(service: &str, object_path: &str) -> Self {
        Self {
            service: service.to_owned(),
            object_path: object_path.to_owned(),
            interface: KWALLET_INTERFACE.to_owned(),
            call_timeout_ms: kwallet_bus::DEFAULT_CALL_TIMEOUT.as_millis() as u64,
            await_timeout_ms: kwallet_bus::DEFAULT_AWAIT_TIMEOUT.as_millis() as u64,
            history_capacity: kwallet_bus::DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::invalid("service", "must not be empty"));
        }
        if !self.object_path.starts_with('/') {
            return Err(ConfigError::invalid("object_path", "must start with '/'"));
        }
        if self.interface.trim().is_empty() {
            return Err(ConfigError::invalid("interface", "must not be empty"));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::invalid("call_timeout_ms", "must be positive"));
        }
        if self.await_timeout_ms == 0 {
            return Err(ConfigError::invalid("await_timeout_ms", "must be positive"));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::invalid("history_capacity", "must be positive"));
        }
        Ok(())
    }

    pub fn target(&self) -> Target {
        Target::new(&self.service, &self.object_path, &self.interface)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }

    pub fn call_config(&self) -> CallConfig {
        CallConfig { timeout: self.call_timeout() }
    }

    /// Settings for the process-wide router. Only the first facade's config
    /// matters if several share one router.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            history_capacity: self.history_capacity,
            await_timeout: self.await_timeout(),
        }
    }
}
