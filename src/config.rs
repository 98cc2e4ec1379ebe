//! Service configuration.
//!
//! Loaded in three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file named by `FLIGHT_FEED_CONFIG` (optional)
//! 3. Environment overrides:
//!    - `FLIGHT_FEED_REDIS_URL`: store connection string
//!    - `FLIGHT_FEED_URL`: upstream feed URL
//!    - `FLIGHT_FEED_INTERVAL_SECS`: ingestion interval
//!    - `FLIGHT_FEED_LIFETIME_SECS`: scheduler loop lifetime (0 = unbounded)
//!    - `FLIGHT_FEED_QUERY_TIMEOUT_MS`: per-query timeout (0 = none)
//!    - `FLIGHT_FEED_LOG_FORMAT`: `text` or `json`
//!    - `FLIGHT_FEED_LOG`: default tracing filter

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "FLIGHT_FEED_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightFeedConfig {
    pub store: StoreConfig,
    pub feed: FeedConfig,
    pub schedule: ScheduleConfig,
    pub query: QueryConfig,
    pub logging: LogConfig,
}

/// Key-value store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Upstream feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Feed URL. Required when ingestion is enabled.
    pub url: Option<String>,
    /// Timeout for connecting and receiving response headers (default: 60s).
    /// The body is streamed without a deadline.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Largest single `flights` element the decoder will buffer (default: 1MB)
    pub max_record_bytes: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            url: None,
            request_timeout: Duration::from_secs(60),
            max_record_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Ingestion scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Run ingestion at all
    pub enabled: bool,
    /// Time between runs (default: 30 minutes)
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    /// Lifetime of the periodic loop. Runs already started are not affected.
    #[serde(with = "option_duration_millis")]
    pub lifetime: Option<Duration>,
    /// How long shutdown waits for an active run before cancelling it
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            enabled: true,
            interval: Duration::from_secs(30 * 60),
            lifetime: None,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl ScheduleConfig {
    /// Configuration for tests (fast ticks)
    pub fn test() -> Self {
        ScheduleConfig {
            enabled: true,
            interval: Duration::from_millis(100),
            lifetime: None,
            shutdown_grace: Duration::from_millis(50),
        }
    }
}

/// Query engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// COUNT hint for each SCAN page
    pub scan_page_size: usize,
    /// Upper bound on concurrent per-key store reads
    pub max_in_flight: usize,
    /// Optional bound on a whole query
    #[serde(with = "option_duration_millis")]
    pub timeout: Option<Duration>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            scan_page_size: 10,
            max_in_flight: 64,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Text,
            filter: "info".to_string(),
        }
    }
}

impl FlightFeedConfig {
    /// Defaults, then the file named by `FLIGHT_FEED_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Same layering as [`load`](Self::load), leaving validation to the caller.
    pub fn load_unvalidated() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment overrides on top of the current values
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("FLIGHT_FEED_REDIS_URL") {
            self.store.redis_url = url;
        }
        if let Ok(url) = std::env::var("FLIGHT_FEED_URL") {
            self.feed.url = Some(url);
        }
        if let Some(secs) = env_u64("FLIGHT_FEED_INTERVAL_SECS") {
            self.schedule.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("FLIGHT_FEED_LIFETIME_SECS") {
            self.schedule.lifetime = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(ms) = env_u64("FLIGHT_FEED_QUERY_TIMEOUT_MS") {
            self.query.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Ok(format) = std::env::var("FLIGHT_FEED_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => {}
            }
        }
        if let Ok(filter) = std::env::var("FLIGHT_FEED_LOG") {
            self.logging.filter = filter;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.enabled && self.feed.url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid(
                "feed.url is required when ingestion is enabled".to_string(),
            ));
        }
        if self.schedule.interval.is_zero() {
            return Err(ConfigError::Invalid("schedule.interval must be positive".to_string()));
        }
        if self.query.scan_page_size == 0 {
            return Err(ConfigError::Invalid("query.scan_page_size must be positive".to_string()));
        }
        if self.query.max_in_flight == 0 {
            return Err(ConfigError::Invalid("query.max_in_flight must be positive".to_string()));
        }
        if self.feed.max_record_bytes == 0 {
            return Err(ConfigError::Invalid("feed.max_record_bytes must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FlightFeedConfig::default();
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.schedule.interval, Duration::from_secs(1800));
        assert!(config.schedule.lifetime.is_none());
        assert_eq!(config.query.scan_page_size, 10);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_default_requires_feed_url() {
        let config = FlightFeedConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = FlightFeedConfig::default();
        config.schedule.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FlightFeedConfig::from_toml(
            r#"
            [feed]
            url = "http://feed.local/flights"

            [schedule]
            interval = 60000
            lifetime = 300000

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.feed.url.as_deref(), Some("http://feed.local/flights"));
        assert_eq!(config.feed.max_record_bytes, 1024 * 1024);
        assert_eq!(config.schedule.interval, Duration::from_secs(60));
        assert_eq!(config.schedule.lifetime, Some(Duration::from_secs(300)));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.query.max_in_flight, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nredis_url = \"redis://cache:6379\"").unwrap();

        let config = FlightFeedConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.redis_url, "redis://cache:6379");
    }

    #[test]
    fn test_from_file_errors() {
        let missing = FlightFeedConfig::from_file(Path::new("/nonexistent/flight-feed.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[schedule]\ninterval = \"soon\"").unwrap();
        let bad = FlightFeedConfig::from_file(file.path());
        assert!(matches!(bad, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = FlightFeedConfig::default();
        config.feed.url = Some("http://feed.local".to_string());
        config.query.max_in_flight = 0;
        assert!(config.validate().is_err());

        config.query.max_in_flight = 1;
        config.schedule.interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
