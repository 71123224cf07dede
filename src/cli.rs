//! Command-line interface parsing for the places proxy
//!
//! Every flag also reads a `PLACES_PROXY_*` environment variable. Flags left
//! unset keep the values from `ProxyConfig::default()`.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::config::{ConfigError, LogFormat, ProxyConfig};
use crate::limiter::WindowLimit;

/// Places proxy - admission-controlled caching proxy for a places API
#[derive(Parser, Debug)]
#[command(name = "places-proxy")]
#[command(about = "Admission-controlled caching proxy for places autocomplete and details")]
#[command(version)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "PLACES_PROXY_BIND", value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    /// Provider API key
    #[arg(long, env = "PLACES_PROXY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Provider places base URL
    #[arg(long, env = "PLACES_PROXY_UPSTREAM_URL", value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Timeout for each provider call, in milliseconds
    #[arg(long, env = "PLACES_PROXY_UPSTREAM_TIMEOUT_MS", value_name = "MS")]
    pub upstream_timeout_ms: Option<u64>,

    /// Restrict autocomplete to an ISO 3166-1 country code (e.g. "ca")
    #[arg(long, env = "PLACES_PROXY_COUNTRY")]
    pub country: Option<String>,

    /// Language for provider responses (e.g. "en")
    #[arg(long, env = "PLACES_PROXY_LANGUAGE")]
    pub language: Option<String>,

    /// Maximum number of cached responses
    #[arg(long, env = "PLACES_PROXY_CACHE_CAPACITY", value_name = "N")]
    pub cache_capacity: Option<usize>,

    /// TTL for autocomplete results, in seconds
    #[arg(long, env = "PLACES_PROXY_SEARCH_TTL_SECS", value_name = "SECS")]
    pub search_ttl_secs: Option<u64>,

    /// TTL for details records, in seconds
    #[arg(long, env = "PLACES_PROXY_DETAILS_TTL_SECS", value_name = "SECS")]
    pub details_ttl_secs: Option<u64>,

    /// Requests admitted per global window
    #[arg(long, env = "PLACES_PROXY_GLOBAL_MAX", value_name = "N")]
    pub global_max: Option<u32>,

    /// Global window length, in seconds
    #[arg(long, env = "PLACES_PROXY_GLOBAL_WINDOW_SECS", value_name = "SECS")]
    pub global_window_secs: Option<u64>,

    /// Requests admitted per client per window
    #[arg(long, env = "PLACES_PROXY_CLIENT_MAX", value_name = "N")]
    pub client_max: Option<u32>,

    /// Per-client window length, in seconds
    #[arg(long, env = "PLACES_PROXY_CLIENT_WINDOW_SECS", value_name = "SECS")]
    pub client_window_secs: Option<u64>,

    /// How often expired client windows are swept, in seconds
    #[arg(long, env = "PLACES_PROXY_CLEANUP_INTERVAL_SECS", value_name = "SECS")]
    pub cleanup_interval_secs: Option<u64>,

    /// Identify clients by the first X-Forwarded-For hop
    #[arg(long, env = "PLACES_PROXY_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// Log output format: pretty or json
    #[arg(long, env = "PLACES_PROXY_LOG_FORMAT", value_name = "FORMAT")]
    pub log_format: Option<String>,
}

impl ProxyConfig {
    /// Creates a validated ProxyConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(ProxyConfig)` with defaults filled in for unset flags
    /// * `Err(ConfigError)` if a value is missing or out of range
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let defaults = ProxyConfig::default();
        let secs = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };

        let log_format = match cli.log_format.as_deref() {
            Some(raw) => LogFormat::parse(raw)?,
            None => defaults.log_format,
        };

        let config = ProxyConfig {
            bind: cli.bind.unwrap_or(defaults.bind),
            api_key: cli.api_key.clone().unwrap_or_default(),
            upstream_base_url: cli
                .upstream_url
                .clone()
                .unwrap_or(defaults.upstream_base_url),
            upstream_timeout: cli
                .upstream_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.upstream_timeout),
            country: cli.country.clone(),
            language: cli.language.clone(),
            cache_capacity: cli.cache_capacity.unwrap_or(defaults.cache_capacity),
            search_ttl: secs(cli.search_ttl_secs, defaults.search_ttl),
            details_ttl: secs(cli.details_ttl_secs, defaults.details_ttl),
            global_limit: WindowLimit::new(
                cli.global_max.unwrap_or(defaults.global_limit.max),
                secs(cli.global_window_secs, defaults.global_limit.window),
            ),
            client_limit: WindowLimit::new(
                cli.client_max.unwrap_or(defaults.client_limit.max),
                secs(cli.client_window_secs, defaults.client_limit.window),
            ),
            cleanup_interval: secs(cli.cleanup_interval_secs, defaults.cleanup_interval),
            trust_forwarded_for: cli.trust_forwarded_for,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }
}
