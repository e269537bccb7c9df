//! Client configuration
//!
//! Values are layered the same way for every deployment: an optional file
//! first, then `RELOCK_*` environment variables on top of it.

use std::path::Path;

use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::LockError;
use crate::{DEFAULT_CHANNEL_PREFIX, DEFAULT_LEASE_MS, DEFAULT_MIN_RETRY_INTERVAL_MS};

const ENV_PREFIX: &str = "RELOCK";

/// Lock client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease applied by `acquire` calls that do not pass one
    pub default_lease_ms: u64,
    /// Prepended to every lock name to form the store key
    pub key_prefix: String,
    /// Release channel is `<channel_prefix>:<lock name>`
    pub channel_prefix: String,
    /// Floor for the TTL-derived wait between two acquisition attempts
    pub min_retry_interval_ms: u64,
    /// Arm the lease watchdog for auto-renewing acquisitions
    pub watchdog_enabled: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: DEFAULT_LEASE_MS,
            key_prefix: String::new(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            min_retry_interval_ms: DEFAULT_MIN_RETRY_INTERVAL_MS,
            watchdog_enabled: true,
        }
    }
}

impl LockConfig {
    /// Load from `RELOCK_*` environment variables only.
    pub fn from_env() -> Result<Self, LockError> {
        Self::build(None, None)
    }

    /// Load from an optional file, overridden by `RELOCK_*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LockError> {
        Self::build(Some(path.as_ref()), None)
    }

    fn build(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, LockError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true)
                .source(env),
        );

        let loaded: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .context("failed to load lock configuration")
            .map_err(|e| LockError::Config(format!("{:#}", e)))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the lock algorithm cannot work with.
    pub fn validate(&self) -> Result<(), LockError> {
        if self.default_lease_ms == 0 {
            return Err(LockError::Config(
                "default_lease_ms must be greater than zero".to_string(),
            ));
        }
        if self.channel_prefix.is_empty() {
            return Err(LockError::Config(
                "channel_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Store key holding the entry of `name`
    pub fn lock_key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    /// Channel release notifications for `name` are published on
    pub fn channel_name(&self, name: &str) -> String {
        format!("{}:{}", self.channel_prefix, self.lock_key(name))
    }
}
