//! Places provider API client
//!
//! Calls the provider's autocomplete and place-details endpoints, bounds every
//! call with a timeout, and classifies failures as retryable or terminal. The
//! client never retries on its own.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use super::{PlaceDetail, Suggestion};

/// Base URL for the provider's places endpoints
pub const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/place";

/// Fields requested from the details endpoint
const DETAIL_FIELDS: &str = "place_id,name,formatted_address,address_components,geometry";

/// Header carrying the per-request correlation id to the provider
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Coarse failure category reported to callers and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Timeout,
    UpstreamHttpError,
    UpstreamProtocolError,
}

/// Errors that can occur when calling the provider
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The call did not complete within the configured timeout
    #[error("upstream call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The provider answered with a non-2xx status
    #[error("upstream responded with HTTP {0}")]
    HttpStatus(u16),

    /// No response was received (connection refused, reset, ...)
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A 2xx response that could not be used
    #[error("upstream protocol error: {0}")]
    Protocol(String),
}

impl UpstreamError {
    pub fn kind(&self) -> UpstreamErrorKind {
        match self {
            UpstreamError::Timeout(_) => UpstreamErrorKind::Timeout,
            UpstreamError::HttpStatus(_) | UpstreamError::Transport(_) => {
                UpstreamErrorKind::UpstreamHttpError
            }
            UpstreamError::Protocol(_) => UpstreamErrorKind::UpstreamProtocolError,
        }
    }

    /// Whether repeating the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) => true,
            // A request that could not be built fails the same way every time
            UpstreamError::Transport(err) => !err.is_builder(),
            UpstreamError::HttpStatus(status) => *status >= 500,
            UpstreamError::Protocol(_) => false,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            UpstreamError::HttpStatus(status) => Some(*status),
            _ => None,
        }
    }
}

/// Normalized autocomplete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub query: String,
    pub session_token: Option<String>,
}

/// Normalized details request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailsParams {
    pub place_id: String,
    pub session_token: Option<String>,
}

/// Client for the provider's places API
#[derive(Debug, Clone)]
pub struct PlacesClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    /// Optional `country:xx` restriction applied to autocomplete
    country: Option<String>,
    /// Optional response language
    language: Option<String>,
}

impl PlacesClient {
    /// Creates a client for the default provider URL
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout,
            country: None,
            language: None,
        }
    }

    /// Points the client at a different provider URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Restricts autocomplete results to one country
    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetches autocomplete suggestions for a query
    ///
    /// # Returns
    /// * `Ok(Vec<Suggestion>)` - possibly empty when the provider reports no results
    /// * `Err(UpstreamError)` - timeout, HTTP failure or unusable response
    pub async fn search_suggestions(
        &self,
        params: &SearchParams,
        correlation_id: Option<&str>,
    ) -> Result<Vec<Suggestion>, UpstreamError> {
        let components = self.country.as_ref().map(|c| format!("country:{}", c));
        let mut query = vec![
            ("input", params.query.as_str()),
            ("key", self.api_key.as_str()),
        ];
        if let Some(token) = params.session_token.as_deref() {
            query.push(("sessiontoken", token));
        }
        if let Some(components) = components.as_deref() {
            query.push(("components", components));
        }
        if let Some(language) = self.language.as_deref() {
            query.push(("language", language));
        }

        let response: AutocompleteResponse =
            self.call("autocomplete/json", &query, correlation_id).await?;
        parse_suggestions(response)
    }

    /// Fetches the details record for a place id
    ///
    /// # Returns
    /// * `Ok(Some(PlaceDetail))` - the normalized record
    /// * `Ok(None)` - the provider reported no results
    /// * `Err(UpstreamError)` - timeout, HTTP failure or unusable response
    pub async fn fetch_details(
        &self,
        params: &DetailsParams,
        correlation_id: Option<&str>,
    ) -> Result<Option<PlaceDetail>, UpstreamError> {
        let mut query = vec![
            ("place_id", params.place_id.as_str()),
            ("fields", DETAIL_FIELDS),
            ("key", self.api_key.as_str()),
        ];
        if let Some(token) = params.session_token.as_deref() {
            query.push(("sessiontoken", token));
        }
        if let Some(language) = self.language.as_deref() {
            query.push(("language", language));
        }

        let response: DetailsResponse = self.call("details/json", &query, correlation_id).await?;
        parse_detail(response)
    }

    /// Performs one GET and decodes the JSON body, bounded by `self.timeout`
    ///
    /// On timeout the in-flight request future is dropped, which aborts it.
    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        correlation_id: Option<&str>,
    ) -> Result<T, UpstreamError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.http_client.get(&url).query(query);
        if let Some(id) = correlation_id {
            request = request.header(REQUEST_ID_HEADER, id);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(UpstreamError::HttpStatus(status.as_u16()));
            }
            let body = response.bytes().await?;
            let decoded = serde_json::from_slice::<T>(&body)
                .map_err(|e| UpstreamError::Protocol(format!("undecodable body: {}", e)))?;
            Ok::<T, UpstreamError>(decoded)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        }
    }
}

/// Maps the provider's embedded status to "has results", "no results" or an error
fn check_provider_status(status: &str, error_message: Option<&str>) -> Result<bool, UpstreamError> {
    match status {
        "OK" => Ok(true),
        "ZERO_RESULTS" => Ok(false),
        other => Err(UpstreamError::Protocol(match error_message {
            Some(message) => format!("provider status {}: {}", other, message),
            None => format!("provider status {}", other),
        })),
    }
}

/// Converts an autocomplete response into suggestions
fn parse_suggestions(response: AutocompleteResponse) -> Result<Vec<Suggestion>, UpstreamError> {
    if !check_provider_status(&response.status, response.error_message.as_deref())? {
        return Ok(Vec::new());
    }

    Ok(response
        .predictions
        .into_iter()
        .map(|prediction| {
            let (main_text, secondary_text) = match prediction.structured_formatting {
                Some(formatting) => (formatting.main_text, formatting.secondary_text),
                None => (prediction.description.clone(), None),
            };
            Suggestion {
                place_id: prediction.place_id,
                description: prediction.description,
                main_text,
                secondary_text,
                types: prediction.types,
            }
        })
        .collect())
}

/// Converts a details response into a normalized record
fn parse_detail(response: DetailsResponse) -> Result<Option<PlaceDetail>, UpstreamError> {
    if !check_provider_status(&response.status, response.error_message.as_deref())? {
        return Ok(None);
    }

    let result = response
        .result
        .ok_or_else(|| UpstreamError::Protocol("missing result".to_string()))?;
    let location = result
        .geometry
        .and_then(|geometry| geometry.location)
        .ok_or_else(|| UpstreamError::Protocol("missing coordinates".to_string()))?;

    let components = &result.address_components;
    let formatted_address = result.formatted_address.unwrap_or_default();

    Ok(Some(PlaceDetail {
        name: result.name.unwrap_or_else(|| formatted_address.clone()),
        street_number: find_component(components, "street_number", NameForm::Long),
        route: find_component(components, "route", NameForm::Long),
        locality: find_component(components, "locality", NameForm::Long)
            .or_else(|| find_component(components, "postal_town", NameForm::Long)),
        region_code: find_component(components, "administrative_area_level_1", NameForm::Short),
        postal_code: find_component(components, "postal_code", NameForm::Long),
        country_code: find_component(components, "country", NameForm::Short),
        place_id: result.place_id,
        formatted_address,
        latitude: location.lat,
        longitude: location.lng,
        fetched_at: Utc::now(),
    }))
}

#[derive(Debug, Clone, Copy)]
enum NameForm {
    Long,
    Short,
}

/// Returns the first component tagged with `marker`
fn find_component(components: &[AddressComponent], marker: &str, form: NameForm) -> Option<String> {
    components
        .iter()
        .find(|component| component.types.iter().any(|t| t == marker))
        .map(|component| match form {
            NameForm::Long => component.long_name.clone(),
            NameForm::Short => component.short_name.clone(),
        })
}

/// Autocomplete endpoint response
#[derive(Debug, Deserialize)]
struct AutocompleteResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    place_id: String,
    description: String,
    #[serde(default)]
    structured_formatting: Option<StructuredFormatting>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StructuredFormatting {
    main_text: String,
    #[serde(default)]
    secondary_text: Option<String>,
}

/// Details endpoint response
#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    result: Option<DetailsResult>,
}

#[derive(Debug, Deserialize)]
struct DetailsResult {
    place_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    #[serde(default)]
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    short_name: String,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    location: Option<LatLng>,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}
