//! Configuration module for pool sizing, compression, and file writing
//!
//! [`PersistConfig`] gathers the settings of every component so a gateway can
//! be built from one value. It can be deserialized from JSON and overridden
//! from `TAGPERSIST_*` environment variables.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::compression::EncodingConfig;
use crate::gateway::GatewayConfig;
use crate::pool::PoolConfig;
use crate::{PersistError, Result};

/// Environment variable overriding [`EncodingConfig::gzip_level`]
pub const ENV_GZIP_LEVEL: &str = "TAGPERSIST_GZIP_LEVEL";
/// Environment variable overriding [`EncodingConfig::batch_window`]
pub const ENV_BATCH_WINDOW: &str = "TAGPERSIST_BATCH_WINDOW";
/// Environment variable overriding [`PoolConfig::max_retained`]
pub const ENV_POOL_MAX_RETAINED: &str = "TAGPERSIST_POOL_MAX_RETAINED";
/// Environment variable overriding [`GatewayConfig::create_parent_dirs`]
pub const ENV_CREATE_PARENT_DIRS: &str = "TAGPERSIST_CREATE_PARENT_DIRS";
/// Environment variable overriding [`GatewayConfig::sync_data`]
pub const ENV_SYNC_DATA: &str = "TAGPERSIST_SYNC_DATA";
/// Environment variable overriding [`GatewayConfig::remove_partial_on_error`]
pub const ENV_REMOVE_PARTIAL: &str = "TAGPERSIST_REMOVE_PARTIAL";

/// Settings for every component of the persistence pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Buffer pool sizing
    pub pool: PoolConfig,
    /// Gzip level and batching window
    pub encoding: EncodingConfig,
    /// File writing behaviour
    pub gateway: GatewayConfig,
}

impl PersistConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PersistConfig = serde_json::from_str(json)
            .map_err(|e| PersistError::config(format!("invalid configuration JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Defaults with `TAGPERSIST_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name, then validate
    ///
    /// # Arguments
    /// * `lookup` - Returns the value for an override key, if set
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = parse_override(&lookup, ENV_GZIP_LEVEL)? {
            self.encoding.gzip_level = level;
        }
        if let Some(window) = parse_override(&lookup, ENV_BATCH_WINDOW)? {
            self.encoding.batch_window = window;
        }
        if let Some(retained) = parse_override(&lookup, ENV_POOL_MAX_RETAINED)? {
            self.pool.max_retained = retained;
        }
        if let Some(flag) = parse_flag(&lookup, ENV_CREATE_PARENT_DIRS)? {
            self.gateway.create_parent_dirs = flag;
        }
        if let Some(flag) = parse_flag(&lookup, ENV_SYNC_DATA)? {
            self.gateway.sync_data = flag;
        }
        if let Some(flag) = parse_flag(&lookup, ENV_REMOVE_PARTIAL)? {
            self.gateway.remove_partial_on_error = flag;
        }
        self.validate()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.encoding.validate()?;
        Ok(())
    }
}

fn parse_override<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PersistError::config(format!("{key}={raw}: {e}"))),
        None => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(None),
        Some("1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some("0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(other) => Err(PersistError::config(format!(
            "{key}={other}: expected a boolean"
        ))),
    }
}
