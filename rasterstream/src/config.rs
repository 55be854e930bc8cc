//! Configuration for the streaming service.
//!
//! All values are plain data supplied at construction. Defaults follow the
//! numbers the subsystem was tuned with (2 GB tile cache, 50% full-fetch
//! threshold, four fetch attempts). An INI file can override them:
//!
//! ```ini
//! [cache]
//! max_size = 2GB
//! directory_capacity = 10000
//!
//! [fetch]
//! max_attempts = 4
//! initial_backoff_ms = 100
//! request_timeout_secs = 30
//! max_concurrent_ranges = 8
//! header_probe = 64KB
//! max_header = 1MB
//!
//! [streaming]
//! full_fetch_threshold = 0.5
//! wait_timeout_secs = 120
//! worker_pool_size = 8
//! window_padding = 0
//! ```

use std::path::Path;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::fetch::{RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_SECS};

// =============================================================================
// Defaults
// =============================================================================

/// Default tile cache budget (2 GB).
pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default number of parsed band directories kept.
pub const DEFAULT_DIRECTORY_CAPACITY: u64 = 10_000;

/// Default per-attempt request timeout (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of ranges of one object fetched concurrently.
pub const DEFAULT_MAX_CONCURRENT_RANGES: usize = 8;

/// Default size of the header prefix read when parsing a directory (64 KB).
pub const DEFAULT_HEADER_PROBE_BYTES: u64 = 64 * 1024;

/// Largest header prefix the parser will ask for (1 MB).
pub const DEFAULT_MAX_HEADER_BYTES: u64 = 1024 * 1024;

/// Ratio of needed bytes to band bytes above which the whole band is fetched.
pub const DEFAULT_FULL_FETCH_THRESHOLD: f64 = 0.5;

/// Default time a request waits on another request's in-flight fetch.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 120;

/// Default number of parcels resolved concurrently.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

/// Errors from configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] ini::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Tile cache settings.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// Byte budget for decoded pixel buffers.
    pub max_size_bytes: u64,
    /// Maximum number of parsed band directories retained.
    pub directory_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_CACHE_SIZE_BYTES,
            directory_capacity: DEFAULT_DIRECTORY_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn with_max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_directory_capacity(mut self, capacity: u64) -> Self {
        self.directory_capacity = capacity;
        self
    }
}

/// Object store access settings.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchConfig {
    /// Retry policy shared by ranged and full fetches.
    pub retry: RetryPolicy,
    /// Timeout for one request attempt.
    pub request_timeout: Duration,
    /// Concurrent range requests per object.
    pub max_concurrent_ranges: usize,
    /// Initial header prefix read by the directory parser.
    pub header_probe_bytes: u64,
    /// Largest header prefix the parser may request.
    pub max_header_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_concurrent_ranges: DEFAULT_MAX_CONCURRENT_RANGES,
            header_probe_bytes: DEFAULT_HEADER_PROBE_BYTES,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

impl FetchConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_ranges(mut self, n: usize) -> Self {
        self.max_concurrent_ranges = n;
        self
    }

    pub fn with_header_probe_bytes(mut self, bytes: u64) -> Self {
        self.header_probe_bytes = bytes;
        self
    }

    pub fn with_max_header_bytes(mut self, bytes: u64) -> Self {
        self.max_header_bytes = bytes;
        self
    }
}

/// Behaviour of the cache and orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamingPolicy {
    /// Needed/total byte ratio above which a whole band is fetched.
    pub full_fetch_threshold: f64,
    /// How long a request waits on an in-flight fetch of the same tile.
    pub wait_timeout: Duration,
    /// Parcels resolved concurrently by a batch.
    pub worker_pool_size: usize,
    /// Extra pixels added around each parcel window.
    pub window_padding: u32,
}

impl Default for StreamingPolicy {
    fn default() -> Self {
        Self {
            full_fetch_threshold: DEFAULT_FULL_FETCH_THRESHOLD,
            wait_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            window_padding: 0,
        }
    }
}

/// Complete configuration of a streaming service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamingConfig {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub streaming: StreamingPolicy,
}

impl StreamingConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_streaming(mut self, streaming: StreamingPolicy) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_cache_size_bytes(mut self, bytes: u64) -> Self {
        self.cache.max_size_bytes = bytes;
        self
    }

    pub fn with_full_fetch_threshold(mut self, threshold: f64) -> Self {
        self.streaming.full_fetch_threshold = threshold;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.streaming.wait_timeout = timeout;
        self
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.streaming.worker_pool_size = size;
        self
    }

    pub fn with_window_padding(mut self, pixels: u32) -> Self {
        self.streaming.window_padding = pixels;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.fetch.retry = retry;
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.streaming.full_fetch_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "streaming.full_fetch_threshold",
                threshold.to_string(),
                "must be between 0.0 and 1.0",
            ));
        }
        if self.streaming.worker_pool_size == 0 {
            return Err(invalid("streaming.worker_pool_size", "0", "must be at least 1"));
        }
        if self.fetch.header_probe_bytes < 16 {
            return Err(invalid(
                "fetch.header_probe",
                self.fetch.header_probe_bytes.to_string(),
                "must be at least 16 bytes",
            ));
        }
        if self.fetch.max_header_bytes < self.fetch.header_probe_bytes {
            return Err(invalid(
                "fetch.max_header",
                self.fetch.max_header_bytes.to_string(),
                "must not be smaller than fetch.header_probe",
            ));
        }
        if self.fetch.request_timeout.is_zero() {
            return Err(invalid("fetch.request_timeout_secs", "0", "must be positive"));
        }
        Ok(())
    }

    /// Loads a configuration file, starting from defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Parses INI text, starting from defaults.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("cache")) {
            if let Some(v) = section.get("max_size") {
                config.cache.max_size_bytes = parse_size("cache.max_size", v)?;
            }
            if let Some(v) = section.get("directory_capacity") {
                config.cache.directory_capacity = parse_num("cache.directory_capacity", v)?;
            }
        }

        if let Some(section) = ini.section(Some("fetch")) {
            let attempts = match section.get("max_attempts") {
                Some(v) => parse_num("fetch.max_attempts", v)?,
                None => DEFAULT_MAX_ATTEMPTS,
            };
            let initial_ms = match section.get("initial_backoff_ms") {
                Some(v) => Some(parse_num::<u64>("fetch.initial_backoff_ms", v)?),
                None => None,
            };
            if section.get("max_attempts").is_some() || initial_ms.is_some() {
                config.fetch.retry = match initial_ms {
                    Some(ms) => RetryPolicy::ExponentialBackoff {
                        max_attempts: attempts,
                        initial_delay: Duration::from_millis(ms),
                        max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
                        multiplier: DEFAULT_BACKOFF_MULTIPLIER,
                    },
                    None => RetryPolicy::exponential(attempts),
                };
            }
            if let Some(v) = section.get("request_timeout_secs") {
                config.fetch.request_timeout =
                    Duration::from_secs(parse_num("fetch.request_timeout_secs", v)?);
            }
            if let Some(v) = section.get("max_concurrent_ranges") {
                config.fetch.max_concurrent_ranges = parse_num("fetch.max_concurrent_ranges", v)?;
            }
            if let Some(v) = section.get("header_probe") {
                config.fetch.header_probe_bytes = parse_size("fetch.header_probe", v)?;
            }
            if let Some(v) = section.get("max_header") {
                config.fetch.max_header_bytes = parse_size("fetch.max_header", v)?;
            }
        }

        if let Some(section) = ini.section(Some("streaming")) {
            if let Some(v) = section.get("full_fetch_threshold") {
                config.streaming.full_fetch_threshold =
                    parse_num("streaming.full_fetch_threshold", v)?;
            }
            if let Some(v) = section.get("wait_timeout_secs") {
                config.streaming.wait_timeout =
                    Duration::from_secs(parse_num("streaming.wait_timeout_secs", v)?);
            }
            if let Some(v) = section.get("worker_pool_size") {
                config.streaming.worker_pool_size = parse_num("streaming.worker_pool_size", v)?;
            }
            if let Some(v) = section.get("window_padding") {
                config.streaming.window_padding = parse_num("streaming.window_padding", v)?;
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn invalid(key: &str, value: impl Into<String>, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
        reason: reason.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

/// Parses a byte size such as `2GB`, `512 MB`, `64KB` or `1048576`.
///
/// Suffixes are binary multiples (1 KB = 1024 bytes).
pub fn parse_size(key: &str, value: &str) -> Result<u64, ConfigError> {
    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (number, multiplier) = [("GB", 1u64 << 30), ("MB", 1 << 20), ("KB", 1 << 10), ("B", 1)]
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n.trim().to_string(), *mult)))
        .unwrap_or_else(|| (upper.clone(), 1));

    let n: f64 = number
        .parse()
        .map_err(|_| invalid(key, value, "expected a size like 512MB"))?;
    if n < 0.0 || !n.is_finite() {
        return Err(invalid(key, value, "size must be non-negative"));
    }
    Ok((n * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_size_bytes, DEFAULT_CACHE_SIZE_BYTES);
        assert_eq!(config.fetch.retry.max_attempts(), 4);
        assert_eq!(config.streaming.full_fetch_threshold, 0.5);
    }

    #[test]
    fn test_builders() {
        let config = StreamingConfig::default()
            .with_cache_size_bytes(1024)
            .with_full_fetch_threshold(0.7)
            .with_worker_pool_size(2)
            .with_window_padding(2);
        assert_eq!(config.cache.max_size_bytes, 1024);
        assert_eq!(config.streaming.full_fetch_threshold, 0.7);
        assert_eq!(config.streaming.worker_pool_size, 2);
        assert_eq!(config.streaming.window_padding, 2);
    }

    #[test]
    fn test_invalid_threshold() {
        let config = StreamingConfig::default().with_full_fetch_threshold(1.5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "streaming.full_fetch_threshold"
        ));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("k", "2GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("k", "512 mb").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("k", "64KB").unwrap(), 65_536);
        assert_eq!(parse_size("k", "100").unwrap(), 100);
        assert_eq!(parse_size("k", "1.5KB").unwrap(), 1536);
        assert!(parse_size("k", "lots").is_err());
    }

    #[test]
    fn test_from_ini_str() {
        let text = "\
[cache]
max_size = 256MB

[fetch]
max_attempts = 3
initial_backoff_ms = 50
header_probe = 16KB

[streaming]
full_fetch_threshold = 0.6
worker_pool_size = 4
window_padding = 2
";
        let config = StreamingConfig::from_ini_str(text).unwrap();
        assert_eq!(config.cache.max_size_bytes, 256 * 1024 * 1024);
        assert_eq!(config.fetch.retry.max_attempts(), 3);
        assert_eq!(
            config.fetch.retry.delay_for_attempt(1),
            Some(Duration::from_millis(50))
        );
        assert_eq!(config.fetch.header_probe_bytes, 16 * 1024);
        assert_eq!(config.streaming.full_fetch_threshold, 0.6);
        assert_eq!(config.streaming.worker_pool_size, 4);
        assert_eq!(config.streaming.window_padding, 2);
        // Untouched values keep their defaults
        assert_eq!(config.cache.directory_capacity, DEFAULT_DIRECTORY_CAPACITY);
    }

    #[test]
    fn test_from_ini_rejects_bad_values() {
        let err = StreamingConfig::from_ini_str("[streaming]\nworker_pool_size = many\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rasterstream.ini");
        std::fs::write(&path, "[cache]\nmax_size = 1GB\n").unwrap();
        let config = StreamingConfig::load(&path).unwrap();
        assert_eq!(config.cache.max_size_bytes, 1 << 30);
    }
}
