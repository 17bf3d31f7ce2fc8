//! Engine configuration
//!
//! Precedence, lowest first: defaults, TOML file, `PLANSYNC_*` environment.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timing and channel settings for sync sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often the local snapshot is polled
    pub poll_interval_ms: u64,
    /// Quiet period before a detected change is pushed
    pub debounce_ms: u64,
    /// How long the poller stays suppressed after a remote application
    pub settle_ms: u64,
    /// Delay between `SET_IDENTITY` and the first `DATA_READY`
    pub handshake_delay_ms: u64,
    /// Buffered messages towards the tool instance
    pub child_channel_capacity: usize,
    /// Remote backend
    pub remote: RemoteConfig,
}

impl SyncConfig {
    /// Environment override for the poll interval
    pub const ENV_POLL_INTERVAL: &'static str = "PLANSYNC_POLL_INTERVAL_MS";
    /// Environment override for the debounce period
    pub const ENV_DEBOUNCE: &'static str = "PLANSYNC_DEBOUNCE_MS";
    /// Environment override for the settle delay
    pub const ENV_SETTLE: &'static str = "PLANSYNC_SETTLE_MS";
    /// Environment override for the handshake delay
    pub const ENV_HANDSHAKE_DELAY: &'static str = "PLANSYNC_HANDSHAKE_DELAY_MS";
    /// Environment override for the remote endpoint
    pub const ENV_REMOTE_ENDPOINT: &'static str = "PLANSYNC_REMOTE_ENDPOINT";

    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML; missing fields keep their defaults
    ///
    /// # Errors
    /// Returns error on invalid TOML or out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then `path` (if given), then the environment
    ///
    /// # Errors
    /// Returns error if the file is unreadable or any layer is invalid
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PLANSYNC_*` overrides read through `lookup`
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let number = |var: &str| -> Result<Option<u64>, ConfigError> {
            lookup(var)
                .map(|value| {
                    value.trim().parse::<u64>().map_err(|_| ConfigError::Env {
                        var: var.to_string(),
                        value,
                    })
                })
                .transpose()
        };

        if let Some(v) = number(Self::ENV_POLL_INTERVAL)? {
            self.poll_interval_ms = v;
        }
        if let Some(v) = number(Self::ENV_DEBOUNCE)? {
            self.debounce_ms = v;
        }
        if let Some(v) = number(Self::ENV_SETTLE)? {
            self.settle_ms = v;
        }
        if let Some(v) = number(Self::ENV_HANDSHAKE_DELAY)? {
            self.handshake_delay_ms = v;
        }
        if let Some(endpoint) = lookup(Self::ENV_REMOTE_ENDPOINT) {
            self.remote.endpoint = Some(endpoint);
        }
        Ok(())
    }

    /// Reject settings that would stall a session
    ///
    /// # Errors
    /// Returns error naming the first invalid field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "debounce_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.settle_ms >= self.poll_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "settle_ms",
                reason: format!(
                    "must be shorter than poll_interval_ms ({})",
                    self.poll_interval_ms
                ),
            });
        }
        if self.child_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "child_channel_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns error if rendering fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// With poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// With debounce period
    #[inline]
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = duration_ms(debounce);
        self
    }

    /// With settle delay
    #[inline]
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle_ms = duration_ms(settle);
        self
    }

    /// With handshake delay
    #[inline]
    #[must_use]
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay_ms = duration_ms(delay);
        self
    }

    /// Poll interval
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Debounce period
    #[inline]
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Settle delay
    #[inline]
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Handshake delay
    #[inline]
    #[must_use]
    pub fn handshake_delay(&self) -> Duration {
        Duration::from_millis(self.handshake_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1500,
            debounce_ms: 900,
            settle_ms: 100,
            handshake_delay_ms: 300,
            child_channel_capacity: 32,
            remote: RemoteConfig::default(),
        }
    }
}

/// Remote backend settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Backend endpoint, e.g. `memory://local`
    pub endpoint: Option<String>,
    /// Backend project identifier
    pub project_id: Option<String>,
}

impl RemoteConfig {
    /// Whether an endpoint is set
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
