//! Connector configuration: cache timeouts handed back to the kernel.
//!
//! Defaults match the design doc: one second of positive caching, one
//! second of attribute caching, and negative caching disabled.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long the kernel may cache a positive name lookup.
pub const DEFAULT_ENTRY_TIMEOUT: Duration = Duration::from_secs(1);
/// How long attribute replies remain valid.
pub const DEFAULT_ATTR_TIMEOUT: Duration = Duration::from_secs(1);
/// Negative caching is disabled by default.
pub const DEFAULT_NEGATIVE_TIMEOUT: Duration = Duration::from_secs(0);

/// Connector-wide configuration.
///
/// `entry_timeout`/`attr_timeout`/`negative_timeout` are advisory values
/// handed back to the kernel in every reply; the connector itself never
/// ages its own table by time, only by explicit `Forget` (see the
/// concurrency design notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Entry (name lookup) cache timeout.
    #[serde(with = "humantime_serde")]
    pub entry_timeout: Duration,
    /// Attribute cache timeout.
    #[serde(with = "humantime_serde")]
    pub attr_timeout: Duration,
    /// Negative-entry cache timeout; zero disables negative caching.
    #[serde(with = "humantime_serde")]
    pub negative_timeout: Duration,
    /// `tracing` `EnvFilter` string controlling log verbosity.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entry_timeout: DEFAULT_ENTRY_TIMEOUT,
            attr_timeout: DEFAULT_ATTR_TIMEOUT,
            negative_timeout: DEFAULT_NEGATIVE_TIMEOUT,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Returns whether negative caching is enabled.
    pub fn negative_caching_enabled(&self) -> bool {
        !self.negative_timeout.is_zero()
    }

    #[must_use]
    pub fn entry_timeout(mut self, timeout: Duration) -> Self {
        self.entry_timeout = timeout;
        self
    }

    #[must_use]
    pub fn attr_timeout(mut self, timeout: Duration) -> Self {
        self.attr_timeout = timeout;
        self
    }

    #[must_use]
    pub fn negative_timeout(mut self, timeout: Duration) -> Self {
        self.negative_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_doc() {
        let config = Config::default();
        assert_eq!(config.entry_timeout, Duration::from_secs(1));
        assert_eq!(config.attr_timeout, Duration::from_secs(1));
        assert_eq!(config.negative_timeout, Duration::from_secs(0));
        assert!(!config.negative_caching_enabled());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::default()
            .entry_timeout(Duration::from_secs(5))
            .negative_timeout(Duration::from_secs(2));
        assert_eq!(config.entry_timeout, Duration::from_secs(5));
        assert!(config.negative_caching_enabled());
    }
}
