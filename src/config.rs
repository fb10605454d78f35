//! Declarative limit configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{DripgateError, Result};

/// A single limit definition: at most `max` hits per `duration_secs`.
///
/// This is the max/duration pair limits are naturally configured in; the
/// bucket's drain rate is derived from it. `key` may be namespaced
/// (`"parent:child"`) to enforce a broader parent limit as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Scope name, optionally namespaced with `:`
    pub key: String,

    /// Maximum hits within the duration (also the bucket capacity)
    pub max: u64,

    /// Duration the maximum applies to, in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,

    /// Penalty applied after a breach, in minutes
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
}

fn default_duration_secs() -> f64 {
    60.0
}

fn default_timeout_minutes() -> u64 {
    crate::ratelimit::DEFAULT_TIMEOUT_MINUTES
}

impl LimitConfig {
    /// Drain rate in hit-units per second.
    pub fn rate(&self) -> f64 {
        self.max as f64 / self.duration_secs
    }

    /// Load a limit definition from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a limit definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimitConfig = serde_yaml::from_str(yaml)
            .map_err(|e| DripgateError::Config(format!("Failed to parse limit config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the definition describes a usable limit.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(DripgateError::Config("limit key must not be empty".into()));
        }
        if self.max == 0 {
            return Err(DripgateError::Capacity(self.max));
        }
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(DripgateError::Config(format!(
                "limit duration must be positive, got {}",
                self.duration_secs
            )));
        }
        Ok(())
    }
}
