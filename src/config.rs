//! Drive configuration: cache ceilings, chunk layout and flush debounce.
//!
//! Defaults can be overridden through the environment (a `.env` file is
//! loaded first if present):
//!
//! - `CIPHERBOX_DRIVE_INACTIVITY_MS`: flush debounce delay in milliseconds
//! - `CIPHERBOX_DRIVE_MEMORY_CAP`: in-process cache ceiling in bytes
//! - `CIPHERBOX_DRIVE_DISK_CAP`: local overflow cache ceiling in bytes
//! - `CIPHERBOX_DRIVE_CHUNK_SIZE`: plaintext chunk size in bytes
//! - `CIPHERBOX_DRIVE_CACHE_DIR`: root directory for spilled chunks
//! - `CIPHERBOX_DRIVE_STORAGE_TIMEOUT_MS`: bound on each storage wait, 0 for none

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encrypt::{DiskUsage, MemoryUsage, DEFAULT_CHUNK_SIZE};

/// Default flush debounce delay (2 seconds).
pub const DEFAULT_INACTIVITY_DELAY: Duration = Duration::from_secs(2);

/// Default bound on a single storage wait (30 seconds).
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default in-process cache ceiling (64 MiB).
pub const DEFAULT_MEMORY_CAP: u64 = 64 * 1024 * 1024;

/// Default local overflow cache ceiling (1 GiB).
pub const DEFAULT_DISK_CAP: u64 = 1024 * 1024 * 1024;

pub const ENV_INACTIVITY_MS: &str = "CIPHERBOX_DRIVE_INACTIVITY_MS";
pub const ENV_MEMORY_CAP: &str = "CIPHERBOX_DRIVE_MEMORY_CAP";
pub const ENV_DISK_CAP: &str = "CIPHERBOX_DRIVE_DISK_CAP";
pub const ENV_CHUNK_SIZE: &str = "CIPHERBOX_DRIVE_CHUNK_SIZE";
pub const ENV_CACHE_DIR: &str = "CIPHERBOX_DRIVE_CACHE_DIR";
pub const ENV_STORAGE_TIMEOUT_MS: &str = "CIPHERBOX_DRIVE_STORAGE_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveConfig {
    pub inactivity_delay_ms: u64,
    pub memory_cap: u64,
    pub disk_cap: u64,
    pub chunk_size: u64,
    pub cache_root: PathBuf,
    /// 0 waits indefinitely.
    pub storage_timeout_ms: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            inactivity_delay_ms: DEFAULT_INACTIVITY_DELAY.as_millis() as u64,
            memory_cap: DEFAULT_MEMORY_CAP,
            disk_cap: DEFAULT_DISK_CAP,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_root: default_cache_root(),
            storage_timeout_ms: DEFAULT_STORAGE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// `<user cache dir>/cipherbox-drive`, or the temp dir if there is none.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cipherbox-drive")
}

impl DriveConfig {
    /// Defaults overridden by `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("Ignoring unreadable .env file: {}", e);
            }
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = parse_u64(&lookup, ENV_INACTIVITY_MS)? {
            config.inactivity_delay_ms = ms;
        }
        if let Some(cap) = parse_u64(&lookup, ENV_MEMORY_CAP)? {
            config.memory_cap = cap;
        }
        if let Some(cap) = parse_u64(&lookup, ENV_DISK_CAP)? {
            config.disk_cap = cap;
        }
        if let Some(size) = parse_u64(&lookup, ENV_CHUNK_SIZE)? {
            if size == 0 {
                return Err(ConfigError::InvalidValue {
                    var: ENV_CHUNK_SIZE,
                    value: "0".to_string(),
                });
            }
            config.chunk_size = size;
        }
        if let Some(ms) = parse_u64(&lookup, ENV_STORAGE_TIMEOUT_MS)? {
            config.storage_timeout_ms = ms;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|d| !d.is_empty()) {
            config.cache_root = PathBuf::from(dir);
        }
        log::debug!("Drive config: {:?}", config);
        Ok(config)
    }

    pub fn inactivity_delay(&self) -> Duration {
        Duration::from_millis(self.inactivity_delay_ms)
    }

    /// Bound for storage waits, for `DirectoryListingHandler::with_timeout`.
    pub fn storage_timeout(&self) -> Option<Duration> {
        (self.storage_timeout_ms > 0).then(|| Duration::from_millis(self.storage_timeout_ms))
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage(self.memory_cap)
    }

    pub fn disk_usage(&self) -> DiskUsage {
        DiskUsage(self.disk_cap)
    }

    /// The per-session subset.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            inactivity_delay: self.inactivity_delay(),
            chunk_size: self.chunk_size,
        }
    }
}

fn parse_u64<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

/// Settings a file session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub inactivity_delay: Duration,
    pub chunk_size: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_delay: DEFAULT_INACTIVITY_DELAY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DriveConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DriveConfig::default());
        assert_eq!(config.inactivity_delay(), Duration::from_secs(2));
        assert_eq!(config.memory_usage(), MemoryUsage(64 * 1024 * 1024));
        assert!(config.cache_root.ends_with("cipherbox-drive"));
        assert_eq!(config.storage_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_env_overrides() {
        let config = DriveConfig::from_lookup(lookup(&[
            (ENV_INACTIVITY_MS, "50"),
            (ENV_MEMORY_CAP, "1048576"),
            (ENV_DISK_CAP, " 2048 "),
            (ENV_CHUNK_SIZE, "4096"),
            (ENV_CACHE_DIR, "/tmp/drive-cache"),
            (ENV_STORAGE_TIMEOUT_MS, "250"),
        ]))
        .unwrap();

        assert_eq!(config.storage_timeout(), Some(Duration::from_millis(250)));

        assert_eq!(config.inactivity_delay(), Duration::from_millis(50));
        assert_eq!(config.memory_cap, 1048576);
        assert_eq!(config.disk_usage(), DiskUsage(2048));
        assert_eq!(config.cache_root, PathBuf::from("/tmp/drive-cache"));
        assert_eq!(
            config.session_settings(),
            SessionSettings {
                inactivity_delay: Duration::from_millis(50),
                chunk_size: 4096,
            }
        );
    }

    #[test]
    fn test_zero_storage_timeout_is_unbounded() {
        let config = DriveConfig::from_lookup(lookup(&[(ENV_STORAGE_TIMEOUT_MS, "0")])).unwrap();
        assert_eq!(config.storage_timeout(), None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = DriveConfig::from_lookup(lookup(&[(ENV_MEMORY_CAP, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == ENV_MEMORY_CAP));

        assert!(DriveConfig::from_lookup(lookup(&[(ENV_CHUNK_SIZE, "0")])).is_err());
    }

    #[test]
    fn test_config_json_fills_missing_fields() {
        let config: DriveConfig = serde_json::from_str(r#"{"memoryCap": 10}"#).unwrap();
        assert_eq!(config.memory_cap, 10);
        assert_eq!(config.disk_cap, DEFAULT_DISK_CAP);
    }
}
