//! Tracing initialisation
//!
//! Installs a `tracing-subscriber` registry with an env filter and a
//! formatted stderr layer. `RUST_LOG` wins over the configured level.

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for tracing initialisation
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Service name attached to the root span
    pub service_name: String,
    /// Minimum level when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "subnet-provisioner".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl TracingConfig {
    fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(Error::Config("service name cannot be empty".to_string()));
        }

        if !self
            .service_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Config(
                "service name must contain only alphanumeric characters, hyphens, and underscores"
                    .to_string(),
            ));
        }

        validate_level(&self.log_level)
    }
}

/// Reject levels the env filter fallback does not understand
pub(crate) fn validate_level(level: &str) -> Result<()> {
    if !VALID_LEVELS.contains(&level) {
        return Err(Error::Config(format!(
            "invalid log level '{}', must be one of: {}",
            level,
            VALID_LEVELS.join(", ")
        )));
    }
    Ok(())
}

/// Initialise tracing once per process
///
/// Returns `Ok(false)` when tracing was already initialised.
pub fn init(config: &TracingConfig) -> Result<bool> {
    config.validate()?;

    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("failed to initialize tracing: {}", e)))?;

    tracing::info!(service = %config.service_name, "Tracing initialized");
    Ok(true)
}
