//! Application configuration loaded from environment variables.

use std::time::Duration;

use sequencer::SequencerConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory stores when unset
/// - `EXCHANGE_TIMEOUT_MS`: bound on each transform/publish exchange; none when unset
/// - `TRANSFORM_DELAY_MS` / `PUBLISH_DELAY_MS`: simulated collaborator latency (default: `0`)
/// - `RECORD_LIMIT`: exchanges the simulated collaborators keep for inspection (default: `1000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub exchange_timeout: Option<Duration>,
    pub transform_delay: Duration,
    pub publish_delay: Duration,
    pub record_limit: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            exchange_timeout: millis("EXCHANGE_TIMEOUT_MS"),
            transform_delay: millis("TRANSFORM_DELAY_MS").unwrap_or(defaults.transform_delay),
            publish_delay: millis("PUBLISH_DELAY_MS").unwrap_or(defaults.publish_delay),
            record_limit: lookup("RECORD_LIMIT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.record_limit),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Dispatcher options derived from this configuration.
    pub fn sequencer_config(&self) -> SequencerConfig {
        let config = SequencerConfig::new();
        match self.exchange_timeout {
            Some(timeout) => config.with_exchange_timeout(timeout),
            None => config,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            exchange_timeout: None,
            transform_delay: Duration::ZERO,
            publish_delay: Duration::ZERO,
            record_limit: 1000,
        }
    }
}
