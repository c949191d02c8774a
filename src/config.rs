use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::StoreConfig;

/// The operating mode selected at startup (spec §4.5).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Neither the public endpoint nor the session resource exist.
    Disabled,
    /// Every request to the public endpoint gets a 307 to `delegation_url`.
    Delegated,
    /// The store is instantiated and the full CRUD endpoint is mounted.
    Native,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Recognized configuration (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RendezvousConfig {
    #[serde(default)]
    pub mode: Mode,

    /// Required when `mode = delegated`.
    pub delegation_url: Option<String>,

    /// If set, the legacy endpoint unconditionally redirects here,
    /// independent of `mode` (spec §4.5, "older variant").
    pub legacy_redirect_url: Option<String>,

    /// Path the legacy endpoint is mounted at when `legacy_redirect_url` is
    /// set. Paths are a deployment choice (spec §6 note).
    #[serde(default = "default_legacy_path")]
    pub legacy_path: String,

    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_soft_capacity")]
    pub soft_capacity: usize,
    #[serde(default = "default_hard_capacity")]
    pub hard_capacity: usize,
    #[serde(default = "default_max_content_length_bytes")]
    pub max_content_length_bytes: usize,

    /// Absolute URL prefix used by the URL Builder, e.g.
    /// `https://host/session/`.
    pub session_url_prefix: String,
}

fn default_legacy_path() -> String {
    "/_legacy/rendezvous".to_string()
}

const fn default_ttl_seconds() -> u64 {
    300
}

const fn default_soft_capacity() -> usize {
    100
}

const fn default_hard_capacity() -> usize {
    200
}

const fn default_max_content_length_bytes() -> usize {
    4096
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            delegation_url: None,
            legacy_redirect_url: None,
            legacy_path: default_legacy_path(),
            ttl_seconds: default_ttl_seconds(),
            soft_capacity: default_soft_capacity(),
            hard_capacity: default_hard_capacity(),
            max_content_length_bytes: default_max_content_length_bytes(),
            session_url_prefix: "https://localhost/session/".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("mode = delegated requires delegation_url to be set")]
    MissingDelegationUrl,
    #[error("soft_capacity ({soft}) must be <= hard_capacity ({hard})")]
    CapacityOrdering { soft: usize, hard: usize },
}

impl RendezvousConfig {
    /// Loads configuration from environment variables, the way the
    /// teacher's `main.rs` pulls `REDIS_URL`/`DATABASE_URL` via `dotenv`,
    /// falling back to spec defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match dotenv::var("RENDEZVOUS_MODE").ok().as_deref() {
            Some("native") => Mode::Native,
            Some("delegated") => Mode::Delegated,
            _ => Mode::Disabled,
        };

        let config = Self {
            mode,
            delegation_url: dotenv::var("RENDEZVOUS_DELEGATION_URL").ok(),
            legacy_redirect_url: dotenv::var("RENDEZVOUS_LEGACY_REDIRECT_URL").ok(),
            legacy_path: dotenv::var("RENDEZVOUS_LEGACY_PATH").unwrap_or_else(|_| default_legacy_path()),
            ttl_seconds: env_parsed("RENDEZVOUS_TTL_SECONDS", default_ttl_seconds()),
            soft_capacity: env_parsed("RENDEZVOUS_SOFT_CAPACITY", default_soft_capacity()),
            hard_capacity: env_parsed("RENDEZVOUS_HARD_CAPACITY", default_hard_capacity()),
            max_content_length_bytes: env_parsed(
                "RENDEZVOUS_MAX_CONTENT_LENGTH_BYTES",
                default_max_content_length_bytes(),
            ),
            session_url_prefix: dotenv::var("RENDEZVOUS_SESSION_URL_PREFIX")
                .unwrap_or_else(|_| RendezvousConfig::default().session_url_prefix),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == Mode::Delegated && self.delegation_url.is_none() {
            return Err(ConfigError::MissingDelegationUrl);
        }
        if self.soft_capacity > self.hard_capacity {
            return Err(ConfigError::CapacityOrdering {
                soft: self.soft_capacity,
                hard: self.hard_capacity,
            });
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            ttl: time::Duration::seconds(self.ttl_seconds as i64),
            soft_capacity: self.soft_capacity,
            hard_capacity: self.hard_capacity,
            max_content_length: self.max_content_length_bytes,
            eviction_interval: time::Duration::seconds(1),
        }
    }
}

fn env_parsed<T>(key: &str, default: T) -> T
where
    T: fmt::Display + std::str::FromStr,
{
    dotenv::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_disabled_and_valid() {
        let config = RendezvousConfig::default();
        assert_eq!(config.mode, Mode::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn delegated_without_url_is_invalid() {
        let config = RendezvousConfig {
            mode: Mode::Delegated,
            ..RendezvousConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDelegationUrl)
        ));
    }

    #[test]
    fn soft_capacity_above_hard_capacity_is_invalid() {
        let config = RendezvousConfig {
            soft_capacity: 500,
            hard_capacity: 200,
            ..RendezvousConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CapacityOrdering { .. })
        ));
    }
}
