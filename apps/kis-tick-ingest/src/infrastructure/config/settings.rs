//! Ingest Configuration Settings
//!
//! Configuration types for the ingestion daemon, loaded from environment
//! variables. Invalid numeric values fall back to their defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::BridgeConfig;
use crate::domain::tick::Symbol;
use crate::infrastructure::kis::Credentials;

/// Default KIS REST base URL (virtual trading domain).
pub const DEFAULT_REST_URL: &str = "https://openapivts.koreainvestment.com:29443";

/// Default KIS streaming endpoint.
pub const DEFAULT_WS_URL: &str = "ws://ops.koreainvestment.com:31000";

/// Which tick source feeds the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickSourceKind {
    /// KIS streaming connection.
    #[default]
    Live,
    /// Randomized generator.
    Synthetic,
}

impl TickSourceKind {
    /// Parse source kind from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "synthetic" | "mock" => Self::Synthetic,
            _ => Self::Live,
        }
    }

    /// Get the source name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Synthetic => "synthetic",
        }
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub pong_timeout: Duration,
    /// Socket open timeout.
    pub connect_timeout: Duration,
    /// Approval exchange timeout.
    pub auth_timeout: Duration,
    /// Pause between authentication and the first subscribe.
    pub subscribe_warmup: Duration,
    /// Pause between subscribe sends.
    pub subscribe_delay: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier.
    pub reconnect_delay_multiplier: f64,
    /// Maximum age of a cached approval key.
    pub approval_ttl: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            subscribe_warmup: Duration::from_millis(3000),
            subscribe_delay: Duration::from_millis(100),
            reconnect_delay_initial: Duration::from_millis(300),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            approval_ttl: Duration::from_secs(43_200),
        }
    }
}

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Publish topic.
    pub topic: String,
    /// Consumer queue capacity.
    pub queue_capacity: usize,
    /// Wait on a full queue before dropping.
    pub enqueue_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        let defaults = BridgeConfig::default();
        Self {
            topic: defaults.topic,
            queue_capacity: defaults.queue_capacity,
            enqueue_timeout: defaults.enqueue_timeout,
        }
    }
}

impl BridgeSettings {
    /// Convert into the bridge's own configuration.
    #[must_use]
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            topic: self.topic.clone(),
            queue_capacity: self.queue_capacity,
            enqueue_timeout: self.enqueue_timeout,
        }
    }
}

/// Complete ingest configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Selected tick source.
    pub source: TickSourceKind,
    /// KIS credentials (required for the live source).
    pub credentials: Option<Credentials>,
    /// REST base URL for the approval exchange.
    pub rest_url: String,
    /// Streaming endpoint URL.
    pub ws_url: String,
    /// Symbols to track; empty means every symbol in the reference file.
    pub symbols: Vec<Symbol>,
    /// Reference data file.
    pub reference_data_path: Option<PathBuf>,
    /// Bridge settings.
    pub bridge: BridgeSettings,
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// Synthetic generator cadence.
    pub synthetic_interval: Duration,
    /// Health server port (0 = disabled).
    pub health_port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: TickSourceKind::default(),
            credentials: None,
            rest_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            symbols: Vec::new(),
            reference_data_path: None,
            bridge: BridgeSettings::default(),
            stream: StreamSettings::default(),
            synthetic_interval: Duration::from_millis(500),
            health_port: 8083,
        }
    }
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the live source is selected without credentials.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the live source is selected without credentials.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let stream_defaults = StreamSettings::default();
        let bridge_defaults = BridgeSettings::default();

        let source = get("TICK_SOURCE")
            .map(|s| TickSourceKind::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let credentials = match (get("KIS_APP_KEY"), get("KIS_APP_SECRET")) {
            (Some(key), Some(secret)) => Some(
                Credentials::new(key, secret).map_err(|e| {
                    ConfigError::InvalidValue("KIS_APP_KEY".to_string(), e.to_string())
                })?,
            ),
            _ => None,
        };
        if source == TickSourceKind::Live && credentials.is_none() {
            let missing = if get("KIS_APP_KEY").is_none() {
                "KIS_APP_KEY"
            } else {
                "KIS_APP_SECRET"
            };
            return Err(ConfigError::MissingEnvVar(missing.to_string()));
        }

        let stream = StreamSettings {
            ping_interval: parse_nonzero_secs(
                &get,
                "KIS_PING_INTERVAL_SECS",
                stream_defaults.ping_interval,
            ),
            pong_timeout: parse_nonzero_secs(
                &get,
                "KIS_PONG_TIMEOUT_SECS",
                stream_defaults.pong_timeout,
            ),
            connect_timeout: parse_nonzero_secs(
                &get,
                "KIS_CONNECT_TIMEOUT_SECS",
                stream_defaults.connect_timeout,
            ),
            auth_timeout: parse_nonzero_secs(
                &get,
                "KIS_AUTH_TIMEOUT_SECS",
                stream_defaults.auth_timeout,
            ),
            subscribe_warmup: parse_duration_millis(
                &get,
                "KIS_SUBSCRIBE_WARMUP_MS",
                stream_defaults.subscribe_warmup,
            ),
            subscribe_delay: parse_duration_millis(
                &get,
                "KIS_SUBSCRIBE_DELAY_MS",
                stream_defaults.subscribe_delay,
            ),
            reconnect_delay_initial: parse_nonzero_millis(
                &get,
                "KIS_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_nonzero_secs(
                &get,
                "KIS_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_multiplier(
                &get,
                "KIS_RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            ),
            approval_ttl: parse_duration_secs(
                &get,
                "KIS_APPROVAL_TTL_SECS",
                stream_defaults.approval_ttl,
            ),
        };

        let bridge = BridgeSettings {
            topic: non_empty(&get, "INGEST_TOPIC").unwrap_or(bridge_defaults.topic),
            queue_capacity: parse_or(&get, "INGEST_QUEUE_CAPACITY", bridge_defaults.queue_capacity)
                .max(1),
            enqueue_timeout: parse_duration_millis(
                &get,
                "INGEST_ENQUEUE_TIMEOUT_MS",
                bridge_defaults.enqueue_timeout,
            ),
        };

        Ok(Self {
            source,
            credentials,
            rest_url: non_empty(&get, "KIS_REST_URL").unwrap_or(defaults.rest_url),
            ws_url: non_empty(&get, "KIS_WS_URL").unwrap_or(defaults.ws_url),
            symbols: get("KIS_SYMBOLS").map(|s| parse_symbols(&s)).unwrap_or_default(),
            reference_data_path: non_empty(&get, "REFERENCE_DATA_PATH").map(PathBuf::from),
            bridge,
            stream,
            synthetic_interval: parse_duration_millis(
                &get,
                "SYNTHETIC_INTERVAL_MS",
                defaults.synthetic_interval,
            ),
            health_port: parse_or(&get, "INGEST_HEALTH_PORT", defaults.health_port),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has an unusable value.
    #[error("environment variable {0} is invalid: {1}")]
    InvalidValue(String, String),
    /// No symbols configured and none available from reference data.
    #[error("no symbols configured: set KIS_SYMBOLS or REFERENCE_DATA_PATH")]
    NoSymbols,
}

/// Split a comma-separated symbol list, dropping blanks and duplicates.
#[must_use]
pub fn parse_symbols(raw: &str) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for symbol in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    symbols
}

fn non_empty<F>(get: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    get(key).filter(|v| !v.trim().is_empty())
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(get: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

/// Like `parse_duration_secs`, but zero also falls back to the default.
fn parse_nonzero_secs<F>(get: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
}

fn parse_nonzero_millis<F>(get: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map_or(default, Duration::from_millis)
}

/// Backoff growth factor; must be finite and at least 1.0.
fn parse_multiplier<F>(get: &F, key: &str, default: f64) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|m| m.is_finite() && *m >= 1.0)
        .unwrap_or(default)
}

fn parse_duration_millis<F>(get: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
