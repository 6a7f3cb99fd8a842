//! Reverse geocoding: coordinates to a human-readable place name.
//!
//! A [`ReverseGeocoder`] fetches the raw descriptive string for a coordinate
//! pair; a [`PlaceExtractor`] picks the region and locality out of it; a
//! [`GeocodeResolver`] ties the two together and absorbs failures into a fixed
//! marker so the dashboard never sees an error.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::GeocodeConfig;
use crate::error::{Error, Result};
use crate::telemetry::{Coordinates, PlaceName};

/// Public Nominatim reverse endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://nominatim.openstreetmap.org/reverse";

/// Position of the region (prefecture) in a Japanese-language display name.
pub const DEFAULT_REGION_INDEX: usize = 5;

/// Suffixes of Japanese administrative units: city, ward, town, village.
pub const DEFAULT_LOCALITY_PATTERN: &str = "(市|区|町|村)$";

/// Shown in place of a name when the lookup fails.
pub const DEFAULT_FAILURE_MARKER: &str = "取得失敗";

/// Errors from a reverse-geocoding lookup.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The request could not be sent or its body could not be decoded.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

/// Something that can describe a coordinate pair.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync + std::fmt::Debug {
    /// Fetch the descriptive string for `coordinates`.
    ///
    /// `Ok(None)` means the service answered but had no description.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is unusable.
    async fn reverse(
        &self,
        coordinates: Coordinates,
    ) -> std::result::Result<Option<String>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// A client for a Nominatim-compatible `/reverse` endpoint.
#[derive(Debug, Clone)]
pub struct NominatimClient {
    client: reqwest::Client,
    endpoint: Url,
    language: String,
}

impl NominatimClient {
    /// Build a client from configuration.
    ///
    /// Requests carry the configured `User-Agent`, which the public service
    /// requires. There is no request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL, the user agent is
    /// not a valid header value, or the HTTP client cannot be built.
    pub fn from_config(config: &GeocodeConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            Error::config_validation(format!("invalid geocode endpoint {}: {e}", config.endpoint))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| {
                Error::config_validation(format!("invalid user_agent: {e}"))
            })?,
        );
        let client = reqwest::Client::builder()
            .gzip(true)
            .use_rustls_tls()
            .default_headers(headers)
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self {
            client,
            endpoint,
            language: config.language.clone(),
        })
    }

    /// The full request URL for `coordinates`.
    #[must_use]
    pub fn request_url(&self, coordinates: Coordinates) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("lat", &coordinates.latitude.to_string())
            .append_pair("lon", &coordinates.longitude.to_string())
            .append_pair("accept-language", &self.language);
        url
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimClient {
    /// Fetch `display_name` for `coordinates`.
    ///
    /// Any non-2xx status is reported as [`GeocodeError::Status`] without
    /// reading the body, so an error payload shows the failure marker rather
    /// than an empty place.
    #[instrument(skip(self), level = "debug", err(level = "debug"))]
    async fn reverse(
        &self,
        coordinates: Coordinates,
    ) -> std::result::Result<Option<String>, GeocodeError> {
        let url = self.request_url(coordinates);
        debug!(%url, "Reverse geocoding");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let body: ReverseResponse = response.json().await?;
        Ok(body.display_name)
    }
}

/// Picks region and locality out of a comma-delimited place description.
#[derive(Debug, Clone)]
pub struct PlaceExtractor {
    region_index: usize,
    locality: Regex,
}

impl PlaceExtractor {
    /// Create an extractor.
    ///
    /// # Errors
    ///
    /// Returns an error if `locality_pattern` is not a valid regex.
    pub fn new(region_index: usize, locality_pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            region_index,
            locality: Regex::new(locality_pattern)?,
        })
    }

    /// Create an extractor from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured locality pattern is invalid.
    pub fn from_config(config: &GeocodeConfig) -> Result<Self> {
        Self::new(config.region_index, &config.locality_pattern).map_err(|e| {
            Error::config_validation(format!("invalid locality_pattern: {e}"))
        })
    }

    /// Extract a place name.
    ///
    /// The region is the trimmed segment at the configured index; the
    /// locality is the first trimmed segment matching the locality pattern.
    /// Either may be missing, in which case it is empty.
    #[must_use]
    pub fn extract(&self, display_name: Option<&str>) -> PlaceName {
        let Some(display_name) = display_name else {
            return PlaceName::default();
        };

        let parts: Vec<&str> = display_name.split(',').map(str::trim).collect();
        let region = parts.get(self.region_index).copied().unwrap_or_default();
        let locality = parts
            .iter()
            .copied()
            .find(|part| self.locality.is_match(part))
            .unwrap_or_default();

        PlaceName::compose(region, locality)
    }
}

impl Default for PlaceExtractor {
    fn default() -> Self {
        Self {
            region_index: DEFAULT_REGION_INDEX,
            locality: Regex::new(DEFAULT_LOCALITY_PATTERN).expect("default pattern is valid"),
        }
    }
}

/// Resolves coordinates to a [`PlaceName`], absorbing failures.
#[derive(Debug, Clone)]
pub struct GeocodeResolver {
    geocoder: Arc<dyn ReverseGeocoder>,
    extractor: PlaceExtractor,
    failure_marker: PlaceName,
}

impl GeocodeResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        geocoder: Arc<dyn ReverseGeocoder>,
        extractor: PlaceExtractor,
        failure_marker: impl Into<String>,
    ) -> Self {
        Self {
            geocoder,
            extractor,
            failure_marker: PlaceName::literal(failure_marker),
        }
    }

    /// Create a resolver using the configured extraction rules and marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured locality pattern is invalid.
    pub fn from_config(geocoder: Arc<dyn ReverseGeocoder>, config: &GeocodeConfig) -> Result<Self> {
        Ok(Self::new(
            geocoder,
            PlaceExtractor::from_config(config)?,
            config.failure_marker.clone(),
        ))
    }

    /// The name shown when a lookup fails.
    #[must_use]
    pub fn failure_marker(&self) -> &PlaceName {
        &self.failure_marker
    }

    /// Look up `coordinates`, surfacing any failure.
    ///
    /// # Errors
    ///
    /// Returns the geocoder's error.
    pub async fn lookup(&self, coordinates: Coordinates) -> std::result::Result<PlaceName, GeocodeError> {
        let display_name = self.geocoder.reverse(coordinates).await?;
        Ok(self.extractor.extract(display_name.as_deref()))
    }

    /// Look up `coordinates`; a failure yields the failure marker.
    pub async fn resolve(&self, coordinates: Coordinates) -> PlaceName {
        match self.lookup(coordinates).await {
            Ok(place) => place,
            Err(e) => {
                warn!(error = %e, "Reverse geocoding failed");
                self.failure_marker.clone()
            }
        }
    }
}

/// Resolve one position against the configured endpoint.
///
/// Unlike [`GeocodeResolver::resolve`], a failed lookup is returned as
/// [`Error::Geocode`] instead of being replaced by the failure marker.
///
/// # Errors
///
/// Returns an error if the client cannot be built, the locality pattern is
/// invalid, or the lookup fails.
pub async fn lookup_place(config: &GeocodeConfig, coordinates: Coordinates) -> Result<PlaceName> {
    let client = NominatimClient::from_config(config)?;
    let resolver = GeocodeResolver::from_config(Arc::new(client), config)?;
    Ok(resolver.lookup(coordinates).await?)
}
