//! # Memory Configuration
//!
//! Arena sizing and validation switches, loaded once at startup from TOML.
//!
//! ```toml
//! [device_local]
//! arena_size = 134217728
//!
//! [host_visible]
//! arena_size = 33554432
//! require_coherent = true
//! debug_checks = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::MemoryLocation;
use crate::error::{MemoryError, MemoryResult};

/// 128 MiB, the default size of a device-local arena.
pub const DEFAULT_DEVICE_ARENA_SIZE: u64 = 128 * 1024 * 1024;

/// 32 MiB, the default size of a host-visible arena.
pub const DEFAULT_HOST_ARENA_SIZE: u64 = 32 * 1024 * 1024;

/// Configuration for one pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Size of each new arena. Larger requests get an arena of their own size.
    pub arena_size: u64,
    /// Host-visible pools only accept coherent memory types when set.
    pub require_coherent: bool,
    /// Scan the free-list for overlaps on every free.
    pub debug_checks: bool,
}

impl PoolConfig {
    /// Default configuration for a location.
    #[must_use]
    pub const fn for_location(location: MemoryLocation) -> Self {
        let arena_size = match location {
            MemoryLocation::DeviceLocal => DEFAULT_DEVICE_ARENA_SIZE,
            MemoryLocation::HostVisible => DEFAULT_HOST_ARENA_SIZE,
        };
        Self {
            arena_size,
            require_coherent: true,
            debug_checks: cfg!(debug_assertions),
        }
    }

    /// Sets the arena size.
    #[must_use]
    pub const fn with_arena_size(mut self, arena_size: u64) -> Self {
        self.arena_size = arena_size;
        self
    }

    /// Checks the values are usable.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `arena_size` is zero.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.arena_size == 0 {
            return Err(MemoryError::InvalidConfig("arena_size must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_location(MemoryLocation::DeviceLocal)
    }
}

/// Configuration for both pools of a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Device-local pool.
    #[serde(default = "device_local_default")]
    pub device_local: PoolConfig,
    /// Host-visible pool.
    #[serde(default = "host_visible_default")]
    pub host_visible: PoolConfig,
}

fn device_local_default() -> PoolConfig {
    PoolConfig::for_location(MemoryLocation::DeviceLocal)
}

fn host_visible_default() -> PoolConfig {
    PoolConfig::for_location(MemoryLocation::HostVisible)
}

impl MemoryConfig {
    /// Parses a configuration from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| MemoryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MemoryError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks both pool configurations.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if either pool is invalid.
    pub fn validate(&self) -> MemoryResult<()> {
        self.device_local.validate()?;
        self.host_visible.validate()
    }

    /// Returns the pool configuration for a location.
    #[must_use]
    pub const fn pool(&self, location: MemoryLocation) -> &PoolConfig {
        match location {
            MemoryLocation::DeviceLocal => &self.device_local,
            MemoryLocation::HostVisible => &self.host_visible,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            device_local: device_local_default(),
            host_visible: host_visible_default(),
        }
    }
}
