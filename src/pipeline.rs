//! Request orchestration for the two proxied lookups
//!
//! Both endpoints run the same sequence, stopping at the first exit:
//! admission, validation, cache lookup, upstream call, cache population,
//! response. Concurrent misses for the same key are not coalesced; each one
//! calls the provider.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::TtlCache;
use crate::config::{ConfigError, ProxyConfig};
use crate::data::{DetailsParams, PlaceDetail, PlacesClient, SearchParams, Suggestion, UpstreamError};
use crate::error::ProxyError;
use crate::limiter::RateLimiter;

/// Longest accepted search query, in characters
pub const MAX_QUERY_CHARS: usize = 256;
/// Longest accepted place id, in characters
pub const MAX_PLACE_ID_CHARS: usize = 512;
/// Longest accepted session token, in characters
pub const MAX_SESSION_TOKEN_CHARS: usize = 128;
pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 20;

/// Values stored in the shared response cache
#[derive(Debug, Clone)]
pub enum CachedPayload {
    Suggestions(Vec<Suggestion>),
    Detail(Option<PlaceDetail>),
}

pub type ResponseCache = TtlCache<String, CachedPayload>;

/// Conversion between a lookup's result type and its cache slot
trait Cacheable: Sized {
    fn into_payload(self) -> CachedPayload;
    fn from_payload(payload: CachedPayload) -> Option<Self>;
}

impl Cacheable for Vec<Suggestion> {
    fn into_payload(self) -> CachedPayload {
        CachedPayload::Suggestions(self)
    }

    fn from_payload(payload: CachedPayload) -> Option<Self> {
        match payload {
            CachedPayload::Suggestions(suggestions) => Some(suggestions),
            _ => None,
        }
    }
}

impl Cacheable for Option<PlaceDetail> {
    fn into_payload(self) -> CachedPayload {
        CachedPayload::Detail(self)
    }

    fn from_payload(payload: CachedPayload) -> Option<Self> {
        match payload {
            CachedPayload::Detail(detail) => Some(detail),
            _ => None,
        }
    }
}

/// Which lookup a request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    Details,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Search => "search",
            Operation::Details => "details",
        }
    }

    /// Cache key in this operation's namespace
    pub fn cache_key(&self, normalized: &str) -> String {
        format!("{}:{}", self.as_str(), normalized)
    }
}

/// Whether a response came from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

/// A successful lookup result
#[derive(Debug, Clone, Serialize)]
pub struct Served<T> {
    pub data: T,
    pub cache: CacheStatus,
    pub request_id: String,
}

/// Raw autocomplete query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub input: Option<String>,
    pub session_token: Option<String>,
    pub limit: Option<String>,
}

/// Raw details query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailsRequest {
    pub place_id: Option<String>,
    pub session_token: Option<String>,
}

/// Per-operation cache lifetimes
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub search: Duration,
    pub details: Duration,
}

/// Identifies the request being served, for admission and logging
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub client_id: &'a str,
    pub request_id: &'a str,
}

/// Shared request pipeline
///
/// The limiter and cache are process-wide and handed in explicitly so tests can
/// build isolated instances.
#[derive(Debug)]
pub struct Pipeline {
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    client: PlacesClient,
    ttls: CacheTtls,
}

impl Pipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        client: PlacesClient,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            limiter,
            cache,
            client,
            ttls,
        }
    }

    /// Builds the limiter, cache and client described by `config`
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or(ConfigError::MustBePositive("cache capacity"))?;

        let client = PlacesClient::new(config.api_key.clone(), config.upstream_timeout)
            .with_base_url(config.upstream_base_url.clone())
            .with_country(config.country.clone())
            .with_language(config.language.clone());

        Ok(Self::new(
            Arc::new(RateLimiter::new(config.global_limit, config.client_limit)),
            Arc::new(TtlCache::new(capacity)),
            client,
            CacheTtls {
                search: config.search_ttl,
                details: config.details_ttl,
            },
        ))
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Serves an autocomplete lookup
    pub async fn search(
        &self,
        ctx: RequestContext<'_>,
        request: SearchRequest,
    ) -> Result<Served<Vec<Suggestion>>, ProxyError> {
        let started = Instant::now();
        self.admit(Operation::Search, ctx)?;
        let (params, limit) = validate_search(request)?;

        let key = Operation::Search.cache_key(&params.query);
        let fetch = self.client.search_suggestions(&params, Some(ctx.request_id));
        let (mut suggestions, cache) = self
            .lookup::<Vec<Suggestion>, _>(Operation::Search, ctx, key, fetch)
            .await?;

        // Stored untruncated so one entry serves every limit
        suggestions.truncate(limit);
        log_served(Operation::Search, ctx, cache, started);

        Ok(Served {
            data: suggestions,
            cache,
            request_id: ctx.request_id.to_string(),
        })
    }

    /// Serves a place-details lookup
    pub async fn details(
        &self,
        ctx: RequestContext<'_>,
        request: DetailsRequest,
    ) -> Result<Served<Option<PlaceDetail>>, ProxyError> {
        let started = Instant::now();
        self.admit(Operation::Details, ctx)?;
        let params = validate_details(request)?;

        let key = Operation::Details.cache_key(&params.place_id);
        let fetch = self.client.fetch_details(&params, Some(ctx.request_id));
        let (detail, cache) = self
            .lookup::<Option<PlaceDetail>, _>(Operation::Details, ctx, key, fetch)
            .await?;
        log_served(Operation::Details, ctx, cache, started);

        Ok(Served {
            data: detail,
            cache,
            request_id: ctx.request_id.to_string(),
        })
    }

    /// Runs admission control alone; `search` and `details` call it first
    pub fn admit(&self, op: Operation, ctx: RequestContext<'_>) -> Result<(), ProxyError> {
        self.limiter.check_limits(ctx.client_id).map_err(|limit| {
            tracing::info!(
                request_id = ctx.request_id,
                client = ctx.client_id,
                op = op.as_str(),
                scope = %limit.scope,
                retry_after = limit.retry_after_secs,
                "request rejected by rate limiter"
            );
            ProxyError::from(limit)
        })
    }

    /// Cache lookup, then upstream call and cache population on a miss
    ///
    /// `fetch` is only polled on a miss. No lock is held while it runs.
    async fn lookup<T, F>(
        &self,
        op: Operation,
        ctx: RequestContext<'_>,
        key: String,
        fetch: F,
    ) -> Result<(T, CacheStatus), ProxyError>
    where
        T: Cacheable + Clone,
        F: Future<Output = Result<T, UpstreamError>>,
    {
        if let Some(payload) = self.cache.get(&key) {
            return match T::from_payload(payload) {
                Some(value) => Ok((value, CacheStatus::Hit)),
                None => {
                    tracing::error!(request_id = ctx.request_id, key = %key, "cache slot held a payload of the wrong kind");
                    Err(ProxyError::Internal(format!("mismatched cache payload for {}", key)))
                }
            };
        }

        let upstream_started = Instant::now();
        let value = fetch.await.map_err(|err| {
            tracing::warn!(
                request_id = ctx.request_id,
                op = op.as_str(),
                kind = ?err.kind(),
                retryable = err.is_retryable(),
                upstream_status = ?err.http_status(),
                latency_ms = upstream_started.elapsed().as_millis() as u64,
                error = %err,
                "upstream call failed"
            );
            ProxyError::from(err)
        })?;

        let ttl = match op {
            Operation::Search => self.ttls.search,
            Operation::Details => self.ttls.details,
        };
        self.cache.set(key, value.clone().into_payload(), ttl);
        Ok((value, CacheStatus::Miss))
    }
}

fn log_served(op: Operation, ctx: RequestContext<'_>, cache: CacheStatus, started: Instant) {
    tracing::info!(
        request_id = ctx.request_id,
        client = ctx.client_id,
        op = op.as_str(),
        cache = cache.as_str(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
}

/// Collapses runs of whitespace and trims both ends
/// Collapses whitespace and lowercases, so the forwarded query and its cache
/// key are the same string
fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Treats an empty token the same as an absent one
fn validate_session_token(token: Option<String>) -> Result<Option<String>, ProxyError> {
    let token = match token {
        Some(token) if !token.is_empty() => token,
        _ => return Ok(None),
    };
    if token.chars().count() > MAX_SESSION_TOKEN_CHARS {
        return Err(ProxyError::validation(
            "session_token",
            format!("must be at most {} characters", MAX_SESSION_TOKEN_CHARS),
        ));
    }
    if !token.chars().all(is_token_char) {
        return Err(ProxyError::validation(
            "session_token",
            "may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(Some(token))
}

/// Checks autocomplete input and returns normalized params with the result limit
pub fn validate_search(request: SearchRequest) -> Result<(SearchParams, usize), ProxyError> {
    let query = normalize_query(request.input.as_deref().unwrap_or_default());
    if query.is_empty() {
        return Err(ProxyError::validation("input", "must not be empty"));
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(ProxyError::validation(
            "input",
            format!("must be at most {} characters", MAX_QUERY_CHARS),
        ));
    }

    let limit = match request.limit.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_LIMIT,
        Some(raw) => match raw.parse::<usize>() {
            Ok(limit) if (1..=MAX_LIMIT).contains(&limit) => limit,
            _ => {
                return Err(ProxyError::validation(
                    "limit",
                    format!("must be an integer between 1 and {}", MAX_LIMIT),
                ))
            }
        },
    };

    let session_token = validate_session_token(request.session_token)?;
    Ok((SearchParams { query, session_token }, limit))
}

/// Checks details input and returns normalized params
pub fn validate_details(request: DetailsRequest) -> Result<DetailsParams, ProxyError> {
    let place_id = request.place_id.unwrap_or_default().trim().to_string();
    if place_id.is_empty() {
        return Err(ProxyError::validation("place_id", "must not be empty"));
    }
    if place_id.chars().count() > MAX_PLACE_ID_CHARS {
        return Err(ProxyError::validation(
            "place_id",
            format!("must be at most {} characters", MAX_PLACE_ID_CHARS),
        ));
    }
    if place_id.chars().any(char::is_control) {
        return Err(ProxyError::validation(
            "place_id",
            "must not contain control characters",
        ));
    }

    let session_token = validate_session_token(request.session_token)?;
    Ok(DetailsParams {
        place_id,
        session_token,
    })
}
