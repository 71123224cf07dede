//! Local stand-in for the places provider
//!
//! Spawns an axum server on an ephemeral port whose autocomplete and details
//! endpoints answer with a scripted behaviour and record every call.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use places_proxy::config::ProxyConfig;

pub const AUTOCOMPLETE_OK: &str = r#"{
    "predictions": [
        {
            "description": "123 Main St, Vancouver, BC, Canada",
            "place_id": "ChIJ-main-st",
            "structured_formatting": { "main_text": "123 Main St", "secondary_text": "Vancouver, BC, Canada" },
            "types": ["street_address"]
        },
        {
            "description": "123 Main St, Seattle, WA, USA",
            "place_id": "ChIJ-main-st-sea",
            "structured_formatting": { "main_text": "123 Main St", "secondary_text": "Seattle, WA, USA" },
            "types": ["street_address"]
        },
        {
            "description": "123 Main St, Portland, OR, USA",
            "place_id": "ChIJ-main-st-pdx",
            "structured_formatting": { "main_text": "123 Main St", "secondary_text": "Portland, OR, USA" },
            "types": ["street_address"]
        }
    ],
    "status": "OK"
}"#;

pub const DETAILS_OK: &str = r#"{
    "result": {
        "place_id": "ChIJ-main-st",
        "name": "123 Main St",
        "formatted_address": "123 Main St, Vancouver, BC V6A 2S5, Canada",
        "address_components": [
            { "long_name": "123", "short_name": "123", "types": ["street_number"] },
            { "long_name": "Main Street", "short_name": "Main St", "types": ["route"] },
            { "long_name": "Vancouver", "short_name": "Vancouver", "types": ["locality", "political"] },
            { "long_name": "British Columbia", "short_name": "BC", "types": ["administrative_area_level_1", "political"] },
            { "long_name": "Canada", "short_name": "CA", "types": ["country", "political"] },
            { "long_name": "V6A 2S5", "short_name": "V6A 2S5", "types": ["postal_code"] }
        ],
        "geometry": { "location": { "lat": 49.2827, "lng": -123.1007 } }
    },
    "status": "OK"
}"#;

pub const ZERO_RESULTS: &str = r#"{ "predictions": [], "status": "ZERO_RESULTS" }"#;

pub const DETAILS_NO_COORDINATES: &str = r#"{
    "result": { "place_id": "ChIJ-nowhere", "name": "Nowhere" },
    "status": "OK"
}"#;

pub const REQUEST_DENIED: &str =
    r#"{ "status": "REQUEST_DENIED", "error_message": "The provided API key is invalid." }"#;

/// How an endpoint answers
#[derive(Debug, Clone)]
pub enum Behavior {
    /// 200 with this JSON body
    Json(&'static str),
    /// Bare status code with a plain-text body
    Status(u16),
    /// 200 with this JSON body after a delay
    Slow(Duration, &'static str),
}

/// One request seen by the mock provider
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: &'static str,
    pub query: HashMap<String, String>,
    pub request_id: Option<String>,
}

#[derive(Clone)]
struct ProviderState {
    autocomplete: Behavior,
    details: Behavior,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

/// Handle to a running mock provider
pub struct MockProvider {
    pub addr: SocketAddr,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProvider {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Starts a provider whose endpoints follow the given behaviours
pub async fn spawn_provider(autocomplete: Behavior, details: Behavior) -> MockProvider {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let state = ProviderState {
        autocomplete,
        details,
        calls: Arc::clone(&calls),
    };

    let app = Router::new()
        .route("/autocomplete/json", get(autocomplete_handler))
        .route("/details/json", get(details_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock provider");
    let addr = listener.local_addr().expect("Mock provider has no address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockProvider { addr, calls }
}

/// An address nothing is listening on
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe listener");
    let addr = listener.local_addr().expect("Probe listener has no address");
    drop(listener);
    format!("http://{}", addr)
}

/// Proxy configuration pointed at `base_url` with generous limits
pub fn test_config(base_url: &str) -> ProxyConfig {
    ProxyConfig {
        api_key: "test-key".to_string(),
        upstream_base_url: base_url.to_string(),
        upstream_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

async fn autocomplete_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record(&state, "autocomplete", &headers, query);
    answer(&state.autocomplete).await
}

async fn details_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record(&state, "details", &headers, query);
    answer(&state.details).await
}

fn record(
    state: &ProviderState,
    path: &'static str,
    headers: &HeaderMap,
    query: HashMap<String, String>,
) {
    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.calls.lock().push(RecordedCall {
        path,
        query,
        request_id,
    });
}

async fn answer(behavior: &Behavior) -> Response {
    match behavior {
        Behavior::Json(body) => json(body),
        Behavior::Status(code) => {
            let status = StatusCode::from_u16(*code).expect("Invalid status in test");
            (status, "provider error").into_response()
        }
        Behavior::Slow(delay, body) => {
            tokio::time::sleep(*delay).await;
            json(body)
        }
    }
}

fn json(body: &'static str) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
