//! Configuration for the bridge.
//!
//! The configuration file mirrors the plugin's sections (`api`, `sync`,
//! `cache`, `metrics`). Every field has a default, and
//! [`BridgeConfig::normalized`] clamps values into their supported ranges.

use crate::error::{BridgeError, BridgeResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Floor applied to backoff delays after a 429 response.
pub const RATE_LIMIT_FLOOR: Duration = Duration::from_secs(1);

/// Largest exponent used in the backoff computation.
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Maximum jitter, as a fraction of the computed delay.
const JITTER_FRACTION: f64 = 0.20;

/// Top-level bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Backend connection.
    pub api: ApiConfig,
    /// Periodic trigger intervals and HTTP retry policy.
    pub sync: SyncSettings,
    /// Ban cache persistence.
    pub cache: CacheConfig,
    /// Telemetry sampling.
    pub metrics: MetricsConfig,
    /// Directory that relative cache paths are resolved against.
    #[serde(rename = "dataDir")]
    pub data_dir: PathBuf,
}

/// Backend connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    /// Backend base URL, e.g. `http://backend:8080`.
    pub base_url: String,
    /// Identity of this instance. Must be unique per instance.
    pub server_key: String,
    /// Bearer token sent with every request.
    pub server_token: String,
}

/// Interval and retry settings, in the units used by the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Ban change feed poll interval.
    pub bans_poll_seconds: u64,
    /// Stats flush interval.
    pub stats_flush_seconds: u64,
    /// Metrics push interval.
    pub metrics_seconds: u64,
    /// Presence heartbeat interval.
    pub presence_seconds: u64,
    /// Command poll interval.
    pub commands_poll_seconds: u64,
    /// Attempts per logical request, including the first one.
    pub http_max_attempts: u32,
    /// Backoff for the first retry.
    pub http_base_backoff_millis: u64,
    /// Backoff ceiling.
    pub http_max_backoff_millis: u64,
    /// Per-request timeout.
    pub http_timeout_seconds: u64,
    /// Connect timeout.
    pub http_connect_timeout_seconds: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            bans_poll_seconds: 10,
            stats_flush_seconds: 60,
            metrics_seconds: 15,
            presence_seconds: 15,
            commands_poll_seconds: 3,
            http_max_attempts: 4,
            http_base_backoff_millis: 250,
            http_max_backoff_millis: 5_000,
            http_timeout_seconds: 15,
            http_connect_timeout_seconds: 10,
        }
    }
}

/// Ban cache persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Cache file name or path.
    pub bans_file: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bans_file: PathBuf::from("bans-cache.json"),
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Preferred network interface for throughput sampling.
    pub net_interface: Option<String>,
}

/// Resolved trigger periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncIntervals {
    /// Ban change feed poll.
    pub bans_poll: Duration,
    /// Stats flush.
    pub stats_flush: Duration,
    /// Metrics push.
    pub metrics: Duration,
    /// Presence heartbeat.
    pub presence: Duration,
    /// Command poll.
    pub commands_poll: Duration,
    /// Playtime credit tick.
    pub playtime_tick: Duration,
}

impl BridgeConfig {
    /// Creates a configuration for the given backend.
    pub fn new(
        base_url: impl Into<String>,
        server_key: impl Into<String>,
        server_token: impl Into<String>,
    ) -> Self {
        Self {
            api: ApiConfig {
                base_url: base_url.into(),
                server_key: server_key.into(),
                server_token: server_token.into(),
            },
            ..Default::default()
        }
    }

    /// Loads a JSON configuration file and normalizes it.
    pub fn from_json_file(path: &Path) -> BridgeResult<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: BridgeConfig = serde_json::from_str(&data)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config.normalized())
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the ban cache file.
    pub fn with_bans_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.cache.bans_file = file.into();
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, max_attempts: u32, base: Duration, max: Duration) -> Self {
        self.sync.http_max_attempts = max_attempts;
        self.sync.http_base_backoff_millis = base.as_millis() as u64;
        self.sync.http_max_backoff_millis = max.as_millis() as u64;
        self
    }

    /// Sets the preferred network interface.
    pub fn with_net_interface(mut self, iface: impl Into<String>) -> Self {
        self.metrics.net_interface = Some(iface.into());
        self
    }

    /// Clamps every value into its supported range and trims strings.
    pub fn normalized(mut self) -> Self {
        self.api.base_url = trim_trailing_slash(self.api.base_url.trim()).to_string();
        self.api.server_key = self.api.server_key.trim().to_string();
        self.api.server_token = self.api.server_token.trim().to_string();

        let s = &mut self.sync;
        s.bans_poll_seconds = s.bans_poll_seconds.max(3);
        s.stats_flush_seconds = s.stats_flush_seconds.max(10);
        s.metrics_seconds = s.metrics_seconds.max(5);
        s.presence_seconds = s.presence_seconds.clamp(10, 30);
        s.commands_poll_seconds = s.commands_poll_seconds.max(2);
        s.http_max_attempts = s.http_max_attempts.max(1);
        s.http_base_backoff_millis = s.http_base_backoff_millis.max(50);
        s.http_max_backoff_millis = s.http_max_backoff_millis.max(s.http_base_backoff_millis);
        s.http_timeout_seconds = s.http_timeout_seconds.max(1);
        s.http_connect_timeout_seconds = s.http_connect_timeout_seconds.max(1);

        self.metrics.net_interface = self
            .metrics
            .net_interface
            .take()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty());
        self
    }

    /// Resolved path of the ban cache file.
    pub fn ban_cache_path(&self) -> PathBuf {
        if self.cache.bans_file.is_absolute() {
            self.cache.bans_file.clone()
        } else {
            self.data_dir.join(&self.cache.bans_file)
        }
    }

    /// Retry policy for the request layer.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.sync.http_max_attempts)
            .with_base_delay(Duration::from_millis(self.sync.http_base_backoff_millis))
            .with_max_delay(Duration::from_millis(self.sync.http_max_backoff_millis))
    }

    /// Trigger periods.
    pub fn intervals(&self) -> SyncIntervals {
        SyncIntervals {
            bans_poll: Duration::from_secs(self.sync.bans_poll_seconds),
            stats_flush: Duration::from_secs(self.sync.stats_flush_seconds),
            metrics: Duration::from_secs(self.sync.metrics_seconds),
            presence: Duration::from_secs(self.sync.presence_seconds),
            commands_poll: Duration::from_secs(self.sync.commands_poll_seconds),
            playtime_tick: Duration::from_secs(60),
        }
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.http_timeout_seconds)
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.http_connect_timeout_seconds)
    }

    /// Returns true if the backend URL points at this machine.
    pub fn points_to_localhost(&self) -> bool {
        let url = &self.api.base_url;
        url.contains("127.0.0.1") || url.contains("localhost")
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            sync: SyncSettings::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
            data_dir: PathBuf::from("."),
        }
    }
}

/// Removes a single trailing slash.
pub fn trim_trailing_slash(s: &str) -> &str {
    s.strip_suffix('/').unwrap_or(s)
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(5_000),
        }
    }

    /// Sets the base delay. Raises the maximum delay if needed.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self.max_delay = self.max_delay.max(delay);
        self
    }

    /// Sets the maximum delay, never below the base delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay.max(self.base_delay);
        self
    }

    /// Delay before the retry following attempt `attempt` (1-based), without jitter.
    ///
    /// `min(base * 2^(attempt-1), max)`, floored at one second after a 429.
    pub fn base_delay_for_attempt(&self, attempt: u32, rate_limited: bool) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if rate_limited {
            delay.max(RATE_LIMIT_FLOOR)
        } else {
            delay
        }
    }

    /// Delay before the retry following attempt `attempt`, with up to 20% additive jitter.
    pub fn delay_for_attempt(&self, attempt: u32, rate_limited: bool) -> Duration {
        let unit: f64 = rand::thread_rng().gen();
        with_jitter(self.base_delay_for_attempt(attempt, rate_limited), unit)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Adds `unit * 20%` of `delay` on top of `delay`. `unit` is clamped to `0.0..=1.0`.
pub fn with_jitter(delay: Duration, unit: f64) -> Duration {
    let unit = if unit.is_finite() {
        unit.clamp(0.0, 1.0)
    } else {
        0.0
    };
    delay + delay.mul_f64(JITTER_FRACTION * unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.sync.bans_poll_seconds, 10);
        assert_eq!(config.sync.http_max_attempts, 4);
        assert_eq!(config.ban_cache_path(), PathBuf::from("./bans-cache.json"));
    }

    #[test]
    fn normalization_clamps_and_trims() {
        let mut config = BridgeConfig::new(" http://backend:8080/ ", " srv-1 ", " token ");
        config.sync.bans_poll_seconds = 1;
        config.sync.stats_flush_seconds = 0;
        config.sync.metrics_seconds = 2;
        config.sync.presence_seconds = 90;
        config.sync.commands_poll_seconds = 0;
        config.sync.http_max_attempts = 0;
        config.sync.http_base_backoff_millis = 10;
        config.sync.http_max_backoff_millis = 20;
        config.metrics.net_interface = Some("  ".into());

        let config = config.normalized();
        assert_eq!(config.api.base_url, "http://backend:8080");
        assert_eq!(config.api.server_key, "srv-1");
        assert_eq!(config.api.server_token, "token");
        assert_eq!(config.sync.bans_poll_seconds, 3);
        assert_eq!(config.sync.stats_flush_seconds, 10);
        assert_eq!(config.sync.metrics_seconds, 5);
        assert_eq!(config.sync.presence_seconds, 30);
        assert_eq!(config.sync.commands_poll_seconds, 2);
        assert_eq!(config.sync.http_max_attempts, 1);
        assert_eq!(config.sync.http_base_backoff_millis, 50);
        assert_eq!(config.sync.http_max_backoff_millis, 50);
        assert!(config.metrics.net_interface.is_none());
    }

    #[test]
    fn presence_interval_floor() {
        let mut config = BridgeConfig::default();
        config.sync.presence_seconds = 3;
        assert_eq!(config.normalized().intervals().presence, Duration::from_secs(10));
    }

    #[test]
    fn config_file_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "api": {"baseUrl": "http://127.0.0.1:3000/", "serverKey": "lobby", "serverToken": "t"},
                "sync": {"bansPollSeconds": 20},
                "cache": {"bansFile": "/var/lib/banbridge/bans.json"},
                "metrics": {"netInterface": "eth0"}
            }"#,
        )
        .unwrap();

        let config = BridgeConfig::from_json_file(&path).unwrap();
        assert_eq!(config.api.base_url, "http://127.0.0.1:3000");
        assert_eq!(config.sync.bans_poll_seconds, 20);
        assert_eq!(config.sync.stats_flush_seconds, 60);
        assert_eq!(
            config.ban_cache_path(),
            PathBuf::from("/var/lib/banbridge/bans.json")
        );
        assert_eq!(config.metrics.net_interface.as_deref(), Some("eth0"));
        assert!(config.points_to_localhost());
    }

    #[test]
    fn malformed_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = BridgeConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(30));

        assert_eq!(
            config.base_delay_for_attempt(1, false),
            Duration::from_millis(100)
        );
        assert_eq!(
            config.base_delay_for_attempt(2, false),
            Duration::from_millis(200)
        );
        assert_eq!(
            config.base_delay_for_attempt(4, false),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_base_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(config.base_delay_for_attempt(30, false), Duration::from_secs(5));
        assert!(config.delay_for_attempt(30, false) <= Duration::from_secs(6));
    }

    #[test]
    fn rate_limit_floor() {
        let config = RetryConfig::new(4)
            .with_base_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_millis(200));

        assert_eq!(config.base_delay_for_attempt(1, true), RATE_LIMIT_FLOOR);
        assert_eq!(
            config.base_delay_for_attempt(1, false),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn jitter_bounds() {
        let delay = Duration::from_millis(1000);
        assert_eq!(with_jitter(delay, 0.0), delay);
        assert_eq!(with_jitter(delay, 1.0), Duration::from_millis(1200));
        assert_eq!(with_jitter(delay, 7.0), Duration::from_millis(1200));
        assert_eq!(with_jitter(delay, f64::NAN), delay);
    }

    proptest! {
        #[test]
        fn backoff_within_jitter_window(
            attempt in 1u32..40,
            base_ms in 50u64..2_000,
            extra_ms in 0u64..20_000,
        ) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(base_ms + extra_ms);
            let config = RetryConfig::new(8).with_base_delay(base).with_max_delay(max);

            let exponent = (attempt - 1).min(10);
            let expected = Duration::from_millis((base_ms << exponent).min(base_ms + extra_ms));
            prop_assert_eq!(config.base_delay_for_attempt(attempt, false), expected);

            let actual = config.delay_for_attempt(attempt, false);
            prop_assert!(actual >= expected);
            prop_assert!(actual <= expected.mul_f64(1.2) + Duration::from_nanos(1));
        }
    }
}
