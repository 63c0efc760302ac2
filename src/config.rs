use std::time::Duration;

use anyhow::Context;

use crate::error::TransportError;
use crate::producer::RetryPolicy;

/// Runtime settings for both binaries, loaded from a TOML file with the
/// fields below all optional. A missing file means all defaults.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    /// Receiver listening port.
    pub port: u16,
    /// Producer target.
    pub target_host: String,
    pub target_port: u16,
    /// Emission rate, strictly positive.
    pub messages_per_second: u32,
    pub max_connect_attempts: u32,
    pub connect_backoff_secs: u64,
}

impl Config {
    /// Load from `path` (extension resolved by the config crate), validate,
    /// and seed `RUST_LOG` from the configured level.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()
            .context("Error reading config")?
            .try_deserialize()
            .context("Error parsing config")?;
        config.validate()?;
        if std::env::var("RUST_LOG").is_err() {
            std::env::set_var("RUST_LOG", &config.log_level);
        }
        Ok(config)
    }

    /// Reject unusable settings eagerly; nothing is silently clamped.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.messages_per_second == 0 {
            return Err(TransportError::Config(
                "messages_per_second must be greater than 0".to_string(),
            ));
        }
        if self.max_connect_attempts == 0 {
            return Err(TransportError::Config(
                "max_connect_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_connect_attempts,
            backoff: Duration::from_secs(self.connect_backoff_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            port: 8992,
            target_host: "localhost".to_string(),
            target_port: 8992,
            messages_per_second: 1,
            max_connect_attempts: 100,
            connect_backoff_secs: 5,
        }
    }
}
