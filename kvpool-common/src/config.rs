//! # Store Configuration
//!
//! Purpose: Load and validate the settings a pool needs for one backend
//! target. A config file holds any number of targets, each under its own
//! `[stores.<name>]` table:
//!
//! ```toml
//! [stores.session]
//! address = "127.0.0.1:6379"
//! database = 2
//! key_prefix = "sess"
//! max_idle = 4
//! max_active = 32
//! idle_timeout_ms = 30000
//! wait_timeout_ms = 50
//! ```
//!
//! Validation happens at load time so a broken file fails before the first
//! command is issued.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_MAX_IDLE: usize = 8;
pub const DEFAULT_MAX_ACTIVE: usize = 16;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

/// Validated settings for one store target. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub address: String,
    /// Logical database selected right after dialing.
    pub database: u32,
    /// Namespace prepended to keys as `<prefix>:<key>` when non-empty.
    pub key_prefix: String,
    /// Maximum idle connections kept for reuse.
    pub max_idle: usize,
    /// Maximum connections alive at once (idle + in use).
    pub max_active: usize,
    /// Idle connections older than this are closed; 0 disables eviction.
    pub idle_timeout_ms: u64,
    /// TCP connect timeout; 0 means none.
    pub connect_timeout_ms: u64,
    /// Socket read timeout; 0 means none.
    pub read_timeout_ms: u64,
    /// Socket write timeout; 0 means none.
    pub write_timeout_ms: u64,
    /// How long `acquire` waits on an exhausted pool; 0 fails immediately.
    pub wait_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            address: String::new(),
            database: 0,
            key_prefix: String::new(),
            max_idle: DEFAULT_MAX_IDLE,
            max_active: DEFAULT_MAX_ACTIVE,
            idle_timeout_ms: 0,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            wait_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    stores: HashMap<String, StoreConfig>,
}

impl StoreConfig {
    /// Starts a builder for the given address with default bounds.
    pub fn builder(address: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder {
            config: StoreConfig {
                address: address.into(),
                ..StoreConfig::default()
            },
        }
    }

    /// Reads `path` and returns the validated `[stores.<name>]` section.
    pub fn load(path: impl AsRef<Path>, name: &str) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, name)
    }

    /// Parses TOML text and returns the validated `[stores.<name>]` section.
    pub fn from_toml_str(text: &str, name: &str) -> ConfigResult<Self> {
        let mut file: ConfigFile = toml::from_str(text)?;
        let config = file
            .stores
            .remove(name)
            .ok_or_else(|| ConfigError::MissingSection(name.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its contract.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "address",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_active == 0 {
            return Err(ConfigError::Invalid {
                field: "max_active",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.key_prefix.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "key_prefix",
                reason: "must not contain whitespace".to_string(),
            });
        }
        Ok(())
    }

    /// Idle capacity actually honoured by the pool.
    pub fn effective_max_idle(&self) -> usize {
        self.max_idle.min(self.max_active)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.write_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Builder for `StoreConfig`; `build` validates.
#[derive(Debug, Clone)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn database(mut self, database: u32) -> Self {
        self.config.database = database;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.config.max_idle = max_idle;
        self
    }

    pub fn max_active(mut self, max_active: usize) -> Self {
        self.config.max_active = max_active;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn build(self) -> ConfigResult<StoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [stores.main]
        address = "127.0.0.1:6379"
        database = 3
        key_prefix = "app"
        max_idle = 2
        max_active = 4
        idle_timeout_ms = 500

        [stores.minimal]
        address = "10.0.0.5:6380"

        [stores.broken]
        address = ""
    "#;

    #[test]
    fn loads_named_section() {
        let config = StoreConfig::from_toml_str(SAMPLE, "main").unwrap();
        assert_eq!(config.address, "127.0.0.1:6379");
        assert_eq!(config.database, 3);
        assert_eq!(config.key_prefix, "app");
        assert_eq!(config.max_idle, 2);
        assert_eq!(config.max_active, 4);
        assert_eq!(config.idle_timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config = StoreConfig::from_toml_str(SAMPLE, "minimal").unwrap();
        assert_eq!(config.max_idle, DEFAULT_MAX_IDLE);
        assert_eq!(config.max_active, DEFAULT_MAX_ACTIVE);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.connect_timeout(), Some(Duration::from_millis(2000)));
        assert_eq!(config.wait_timeout(), Duration::ZERO);
    }

    #[test]
    fn empty_address_fails_at_load() {
        let err = StoreConfig::from_toml_str(SAMPLE, "broken").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "address", .. }));
    }

    #[test]
    fn unknown_section_is_reported() {
        let err = StoreConfig::from_toml_str(SAMPLE, "cache").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(name) if name == "cache"));
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let text = "[stores.main]\naddress = \"a:1\"\nmax_actve = 3\n";
        let err = StoreConfig::from_toml_str(text, "main").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn negative_bound_is_a_parse_error() {
        let text = "[stores.main]\naddress = \"a:1\"\nmax_idle = -1\n";
        assert!(matches!(
            StoreConfig::from_toml_str(text, "main"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn builder_rejects_zero_max_active() {
        let err = StoreConfig::builder("127.0.0.1:6379").max_active(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_active", .. }));
    }

    #[test]
    fn idle_capacity_is_capped_by_max_active() {
        let config = StoreConfig::builder("127.0.0.1:6379")
            .max_idle(10)
            .max_active(3)
            .build()
            .unwrap();
        assert_eq!(config.effective_max_idle(), 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = StoreConfig::load("/nonexistent/kvpool.toml", "main").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
