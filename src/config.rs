//! Runtime configuration for the proxy
//!
//! `ProxyConfig` gathers cache capacity, TTLs, rate-limit windows, upstream
//! settings and the listen address. It is built from CLI flags (with
//! environment fallbacks, see `cli.rs`) and validated once at startup.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::data::places::DEFAULT_BASE_URL;
use crate::limiter::WindowLimit;

/// Errors found while validating configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The provider API key is missing or blank
    #[error("Missing provider API key (set --api-key or PLACES_PROXY_API_KEY)")]
    MissingApiKey,

    /// A setting that must be positive was zero
    #[error("Invalid value for {0}: must be greater than zero")]
    MustBePositive(&'static str),

    /// A duration setting is longer than the proxy supports
    #[error("Invalid value for {0}: must be at most {1} seconds")]
    TooLong(&'static str, u64),

    /// The log format is not one of the supported values
    #[error("Invalid log format: '{0}'. Valid formats: pretty, json")]
    InvalidLogFormat(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

/// Complete proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the HTTP server listens on
    pub bind: SocketAddr,
    /// Static provider API key
    pub api_key: String,
    /// Provider places base URL
    pub upstream_base_url: String,
    /// Bound on every provider call
    pub upstream_timeout: Duration,
    /// Optional ISO country restriction for autocomplete
    pub country: Option<String>,
    /// Optional response language
    pub language: Option<String>,
    /// Maximum resident cache entries
    pub cache_capacity: usize,
    /// TTL for autocomplete results
    pub search_ttl: Duration,
    /// TTL for details records
    pub details_ttl: Duration,
    /// Process-wide admission window
    pub global_limit: WindowLimit,
    /// Per-client admission window
    pub client_limit: WindowLimit,
    /// Period of the client-window sweep
    pub cleanup_interval: Duration,
    /// Use the first `X-Forwarded-For` hop as client identity
    pub trust_forwarded_for: bool,
    pub log_format: LogFormat,
}

/// Upper bound for rate-limit windows and the cleanup interval
pub const MAX_WINDOW: Duration = Duration::from_secs(86400);
/// Upper bound for cache TTLs
pub const MAX_TTL: Duration = Duration::from_secs(86400 * 7);
/// Upper bound for the upstream call timeout
pub const MAX_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            api_key: String::new(),
            upstream_base_url: DEFAULT_BASE_URL.to_string(),
            upstream_timeout: Duration::from_millis(5000),
            country: None,
            language: None,
            cache_capacity: 1000,
            search_ttl: Duration::from_secs(300),    // 5 minutes
            details_ttl: Duration::from_secs(3600),  // 1 hour
            global_limit: WindowLimit::new(1000, Duration::from_secs(60)),
            client_limit: WindowLimit::new(60, Duration::from_secs(60)),
            cleanup_interval: Duration::from_secs(60),
            trust_forwarded_for: false,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ProxyConfig {
    /// Checks the settings the proxy cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        let positive = [
            ("cache capacity", self.cache_capacity as u128),
            ("upstream timeout", self.upstream_timeout.as_millis()),
            ("search TTL", self.search_ttl.as_millis()),
            ("details TTL", self.details_ttl.as_millis()),
            ("global max", u128::from(self.global_limit.max)),
            ("global window", self.global_limit.window.as_millis()),
            ("client max", u128::from(self.client_limit.max)),
            ("client window", self.client_limit.window.as_millis()),
            ("cleanup interval", self.cleanup_interval.as_millis()),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::MustBePositive(name));
        }

        let bounded = [
            ("upstream timeout", self.upstream_timeout, MAX_UPSTREAM_TIMEOUT),
            ("search TTL", self.search_ttl, MAX_TTL),
            ("details TTL", self.details_ttl, MAX_TTL),
            ("global window", self.global_limit.window, MAX_WINDOW),
            ("client window", self.client_limit.window, MAX_WINDOW),
            ("cleanup interval", self.cleanup_interval, MAX_WINDOW),
        ];
        match bounded.iter().find(|(_, value, max)| value > max) {
            Some((name, _, max)) => Err(ConfigError::TooLong(name, max.as_secs())),
            None => Ok(()),
        }
    }
}
