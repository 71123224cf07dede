//! HTTP routes for the proxy
//!
//! - `GET /v1/places/autocomplete` - suggestion search
//! - `GET /v1/places/details` - place details
//! - `GET /health` - liveness plus cache and limiter counters
//!
//! Handlers only extract inputs and shape responses; all decisions live in the
//! pipeline.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::error::{ApiError, ProxyError};
use crate::pipeline::{DetailsRequest, Operation, Pipeline, RequestContext, SearchRequest, Served};

/// Correlation id header, echoed on every proxied response
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
/// Cache status header (`hit` / `miss`)
pub const CACHE_HEADER: HeaderName = HeaderName::from_static("x-cache");

/// Longest inbound request id that is reused instead of replaced
const MAX_INBOUND_REQUEST_ID: usize = 64;

/// Shared state for all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    trust_forwarded_for: bool,
    started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, trust_forwarded_for: bool) -> Self {
        Self {
            pipeline,
            trust_forwarded_for,
            started_at: Instant::now(),
        }
    }
}

/// Builds the router with tracing and the panic boundary applied
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/v1/places/autocomplete", get(autocomplete))
        .route("/v1/places/details", get(details))
        .route("/health", get(health));
    with_boundary(routes).with_state(state)
}

/// Applies request tracing and converts handler panics into a generic 500
fn with_boundary<S>(routes: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

async fn autocomplete(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    query: Result<Query<SearchRequest>, QueryRejection>,
) -> Response {
    let request_id = request_id(&headers);
    let client_id = client_identity(&headers, peer.map(|c| c.0), state.trust_forwarded_for);
    let ctx = RequestContext {
        client_id: &client_id,
        request_id: &request_id,
    };

    let result = match query {
        Ok(Query(request)) => state.pipeline.search(ctx, request).await,
        Err(rejection) => reject_query(&state, Operation::Search, ctx, rejection),
    };
    respond(result, &request_id)
}

async fn details(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    query: Result<Query<DetailsRequest>, QueryRejection>,
) -> Response {
    let request_id = request_id(&headers);
    let client_id = client_identity(&headers, peer.map(|c| c.0), state.trust_forwarded_for);
    let ctx = RequestContext {
        client_id: &client_id,
        request_id: &request_id,
    };

    let result = match query {
        Ok(Query(request)) => state.pipeline.details(ctx, request).await,
        Err(rejection) => reject_query(&state, Operation::Details, ctx, rejection),
    };
    respond(result, &request_id)
}

/// Undecodable query strings still count against the rate limits
fn reject_query<T>(
    state: &AppState,
    op: Operation,
    ctx: RequestContext<'_>,
    rejection: QueryRejection,
) -> Result<T, ProxyError> {
    state.pipeline.admit(op, ctx)?;
    Err(ProxyError::validation("query", rejection.body_text()))
}

fn respond<T: Serialize>(result: Result<Served<T>, ProxyError>, request_id: &str) -> Response {
    let mut response = match result {
        Ok(served) => {
            let cache = HeaderValue::from_static(served.cache.as_str());
            let mut response = Json(served).into_response();
            response.headers_mut().insert(CACHE_HEADER, cache);
            response
        }
        Err(err) => {
            if let ProxyError::Internal(detail) = &err {
                tracing::error!(request_id, detail = %detail, "internal error while serving request");
            }
            ApiError::new(err, request_id).into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Reuses a well-formed inbound `x-request-id`, otherwise generates one
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_INBOUND_REQUEST_ID
                && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Identity used for per-client rate limiting
///
/// The first `X-Forwarded-For` hop is only honoured when the proxy is configured
/// to trust it; otherwise the peer IP is used.
pub fn client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    cache: CacheHealth,
    rate_limiter: LimiterHealth,
}

#[derive(Debug, Serialize)]
struct CacheHealth {
    size: usize,
    capacity: usize,
    stats: CacheStats,
}

#[derive(Debug, Serialize)]
struct LimiterHealth {
    tracked_clients: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache = state.pipeline.cache();
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        cache: CacheHealth {
            size: cache.len(),
            capacity: cache.capacity(),
            stats: cache.stats(),
        },
        rate_limiter: LimiterHealth {
            tracked_clients: state.pipeline.limiter().tracked_clients(),
        },
    })
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    // The request is gone by now, so the response gets a fresh id
    let request_id = Uuid::new_v4().to_string();
    tracing::error!(request_id = %request_id, detail, "handler panicked");

    let err = ProxyError::Internal("handler panicked".to_string());
    let mut response = ApiError::new(err, request_id.as_str()).into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
