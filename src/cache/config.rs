//! Configuration for the description cache

use crate::error::{CacheError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the remote discipline pages
pub const DEFAULT_BASE_URL: &str = "https://olympics.com/en/paris-2024/sports";

/// Configuration for the description cache
///
/// Defaults:
/// - Waiters poll every 100ms and give up after 5s
/// - The sweeper pauses 1-10s between fetches and 1-5s between passes
///   so the remote site never sees a burst of requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one stored document per key
    pub cache_dir: PathBuf,

    /// Base URL the HTTP fetcher appends the key slug to
    pub base_url: String,

    /// Interval between status checks while waiting on another fetch
    pub poll_interval: Duration,

    /// Default maximum wait used by `describe` callers that do not pass one
    pub default_max_wait: Duration,

    /// Lower bound of the pause between two sweeper fetches
    pub sweep_item_delay_min: Duration,

    /// Upper bound of the pause between two sweeper fetches
    pub sweep_item_delay_max: Duration,

    /// Lower bound of the pause between two sweeper passes
    pub sweep_idle_delay_min: Duration,

    /// Upper bound of the pause between two sweeper passes
    pub sweep_idle_delay_max: Duration,

    /// Timeout for a single HTTP request
    pub request_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_millis(100),
            default_max_wait: Duration::from_millis(5000),
            sweep_item_delay_min: Duration::from_secs(1),
            sweep_item_delay_max: Duration::from_secs(10),
            sweep_idle_delay_min: Duration::from_secs(1),
            sweep_idle_delay_max: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Load configuration from the environment (and a `.env` file if present)
    ///
    /// Recognized variables:
    /// - `DESCRIPTION_CACHE_DIR`
    /// - `DESCRIPTION_CACHE_BASE_URL`
    /// - `DESCRIPTION_CACHE_POLL_MS`
    /// - `DESCRIPTION_CACHE_MAX_WAIT_MS`
    /// - `DESCRIPTION_CACHE_REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = CacheConfig::builder();

        if let Ok(dir) = std::env::var("DESCRIPTION_CACHE_DIR") {
            builder = builder.cache_dir(dir);
        }
        if let Ok(url) = std::env::var("DESCRIPTION_CACHE_BASE_URL") {
            builder = builder.base_url(url);
        }
        if let Some(ms) = env_u64("DESCRIPTION_CACHE_POLL_MS")? {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = env_u64("DESCRIPTION_CACHE_MAX_WAIT_MS")? {
            builder = builder.default_max_wait(Duration::from_millis(ms));
        }
        if let Some(secs) = env_u64("DESCRIPTION_CACHE_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(CacheError::ConfigError(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.sweep_item_delay_min > self.sweep_item_delay_max {
            return Err(CacheError::ConfigError(
                "sweep_item_delay_min must not exceed sweep_item_delay_max".to_string(),
            ));
        }

        if self.sweep_idle_delay_min > self.sweep_idle_delay_max {
            return Err(CacheError::ConfigError(
                "sweep_idle_delay_min must not exceed sweep_idle_delay_max".to_string(),
            ));
        }

        if self.base_url.trim().is_empty() {
            return Err(CacheError::ConfigError("base_url must not be empty".to_string()));
        }

        Ok(())
    }

    /// Random pause between two sweeper fetches
    pub fn sweep_item_delay(&self) -> Duration {
        random_between(self.sweep_item_delay_min..=self.sweep_item_delay_max)
    }

    /// Random pause between two sweeper passes
    pub fn sweep_idle_delay(&self) -> Duration {
        random_between(self.sweep_idle_delay_min..=self.sweep_idle_delay_max)
    }
}

fn random_between(range: RangeInclusive<Duration>) -> Duration {
    let (min, max) = (range.start().as_millis() as u64, range.end().as_millis() as u64);
    if min >= max {
        return *range.start();
    }
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| CacheError::ConfigError(format!("{}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    cache_dir: Option<PathBuf>,
    base_url: Option<String>,
    poll_interval: Option<Duration>,
    default_max_wait: Option<Duration>,
    sweep_item_delay: Option<(Duration, Duration)>,
    sweep_idle_delay: Option<(Duration, Duration)>,
    request_timeout: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set the directory for stored descriptions
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set the base URL of the remote pages
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the waiter poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the default maximum wait
    pub fn default_max_wait(mut self, wait: Duration) -> Self {
        self.default_max_wait = Some(wait);
        self
    }

    /// Set the pause range between sweeper fetches
    pub fn sweep_item_delay(mut self, min: Duration, max: Duration) -> Self {
        self.sweep_item_delay = Some((min, max));
        self
    }

    /// Set the pause range between sweeper passes
    pub fn sweep_idle_delay(mut self, min: Duration, max: Duration) -> Self {
        self.sweep_idle_delay = Some((min, max));
        self
    }

    /// Set the HTTP request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();
        let (item_min, item_max) = self
            .sweep_item_delay
            .unwrap_or((defaults.sweep_item_delay_min, defaults.sweep_item_delay_max));
        let (idle_min, idle_max) = self
            .sweep_idle_delay
            .unwrap_or((defaults.sweep_idle_delay_min, defaults.sweep_idle_delay_max));

        CacheConfig {
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            base_url: self.base_url.unwrap_or(defaults.base_url),
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            default_max_wait: self.default_max_wait.unwrap_or(defaults.default_max_wait),
            sweep_item_delay_min: item_min,
            sweep_item_delay_max: item_max,
            sweep_idle_delay_min: idle_min,
            sweep_idle_delay_max: idle_max,
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
        }
    }
}
