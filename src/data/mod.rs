//! Normalized places data
//!
//! This module contains the value types served to clients and stored in the
//! response cache, plus the upstream client that produces them.

pub mod places;

pub use places::{DetailsParams, PlacesClient, SearchParams, UpstreamError, UpstreamErrorKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One autocomplete suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Provider identifier, usable with the details lookup
    pub place_id: String,
    /// Full human-readable text of the suggestion
    pub description: String,
    /// Primary line (usually street address or place name)
    pub main_text: String,
    /// Secondary line (usually city, region, country)
    pub secondary_text: Option<String>,
    /// Provider place type markers
    pub types: Vec<String>,
}

/// A resolved place with its structured address and coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceDetail {
    pub place_id: String,
    /// Display name of the place
    pub name: String,
    /// Single-line address as formatted by the provider
    pub formatted_address: String,
    pub street_number: Option<String>,
    pub route: Option<String>,
    /// City or postal town
    pub locality: Option<String>,
    /// Short code of the first-level administrative area (e.g. "CA")
    pub region_code: Option<String>,
    pub postal_code: Option<String>,
    /// ISO 3166-1 alpha-2 country code
    pub country_code: Option<String>,
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
    /// When this record was fetched from the provider
    pub fetched_at: DateTime<Utc>,
}
