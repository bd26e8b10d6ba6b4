//! Provisioner configuration
//!
//! Layered as defaults < YAML file < environment. Environment keys are
//! `<PREFIX>__<FIELD>` for top-level fields and `<PREFIX>__POLL__<FIELD>`
//! for the poll policy, e.g. `SUBNET_PROVISIONER__POLL__MAX_ATTEMPTS=20`.

use crate::models::{AddressBlock, AddressFamily};
use crate::store::DEFAULT_INDEX_LABEL_KEY;
use crate::telemetry;
use crate::waiter::PollPolicy;
use crate::{Error, Result};
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv6Addr;
use std::path::Path;
use std::str::FromStr;

/// Default environment prefix
pub const ENV_PREFIX: &str = "SUBNET_PROVISIONER";

/// Provisioner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Label key holding the allocation index
    pub index_label_key: String,
    /// Family of the parent block to subdivide
    pub parent_family: AddressFamily,
    /// Destination of the route created towards the egress gateway
    pub default_route_destination: AddressBlock,
    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
    /// Association polling
    pub poll: PollPolicy,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            index_label_key: DEFAULT_INDEX_LABEL_KEY.to_string(),
            parent_family: AddressFamily::V6,
            default_route_destination: default_route(),
            log_level: "info".to_string(),
            poll: PollPolicy::default(),
        }
    }
}

fn default_route() -> AddressBlock {
    Ipv6Net::new_assert(Ipv6Addr::UNSPECIFIED, 0).into()
}

impl ProvisionerConfig {
    /// Load from a YAML file, missing fields take their defaults
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional YAML file, then apply environment overrides
    pub fn load_with_env(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(prefix)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides under [`ENV_PREFIX`]
    pub fn from_env() -> Result<Self> {
        Self::load_with_env(None, ENV_PREFIX)
    }

    /// Apply `<prefix>__*` environment overrides
    pub fn apply_env(&mut self, prefix: &str) -> Result<()> {
        if let Some(key) = env_value::<String>(prefix, "INDEX_LABEL_KEY")? {
            self.index_label_key = key;
        }
        if let Some(family) = env_value::<AddressFamily>(prefix, "PARENT_FAMILY")? {
            self.parent_family = family;
        }
        if let Some(route) = env_value::<AddressBlock>(prefix, "DEFAULT_ROUTE_DESTINATION")? {
            self.default_route_destination = route;
        }
        if let Some(level) = env_value::<String>(prefix, "LOG_LEVEL")? {
            self.log_level = level;
        }

        let poll = format!("{}__POLL", prefix);
        if let Some(v) = env_value(&poll, "INITIAL_DELAY_MS")? {
            self.poll.initial_delay_ms = v;
        }
        if let Some(v) = env_value(&poll, "MAX_DELAY_MS")? {
            self.poll.max_delay_ms = v;
        }
        if let Some(v) = env_value(&poll, "MULTIPLIER")? {
            self.poll.multiplier = v;
        }
        if let Some(v) = env_optional(&poll, "MAX_ATTEMPTS")? {
            self.poll.max_attempts = v;
        }
        if let Some(v) = env_value(&poll, "MAX_TRANSIENT_FAILURES")? {
            self.poll.max_transient_failures = v;
        }
        if let Some(v) = env_optional(&poll, "DEADLINE_MS")? {
            self.poll.deadline_ms = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_label_key.trim().is_empty() {
            return Err(Error::Config("index_label_key cannot be empty".to_string()));
        }
        if self.default_route_destination.family() != self.parent_family {
            return Err(Error::Config(format!(
                "default_route_destination {} is not an {} block",
                self.default_route_destination, self.parent_family
            )));
        }
        telemetry::validate_level(&self.log_level)?;
        self.poll.validate()
    }
}

fn env_value<T>(prefix: &str, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let name = format!("{}__{}", prefix, key);
    match std::env::var(&name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// Like [`env_value`], but `none` clears the bound
fn env_optional<T>(prefix: &str, key: &str) -> Result<Option<Option<T>>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_value::<String>(prefix, key)? {
        Some(raw) if raw.eq_ignore_ascii_case("none") => Ok(Some(None)),
        Some(_) => env_value::<T>(prefix, key).map(|v| v.map(Some)),
        None => Ok(None),
    }
}
