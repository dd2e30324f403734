//! Property catalog access.
//!
//! The catalog resolves a property id to the coordinates the geofence is
//! centred on. Records arrive with latitude and longitude either as JSON
//! numbers or as decimal strings; anything else is rejected as malformed
//! rather than coerced.
//!
//! Implementations:
//!
//! - [`MemoryCatalog`]: fixed records, for tests and embedding
//! - [`JsonFileCatalog`]: a JSON array on disk
//! - [`HttpCatalog`]: a REST collection (`GET {base}/houses[/{id}]`), with the
//!   `http` feature

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;

use crate::config::{CatalogConfig, CatalogSource};
use crate::error::{KeyfenceError, Result};
use crate::types::{Coordinate, CoordinateError, PropertyTarget};

static PROPERTY_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

static DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)$").unwrap());

/// Errors from the property catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The id does not match `[A-Za-z0-9_-]{1,64}`.
    #[error("invalid property id: '{0}'")]
    InvalidId(String),

    /// No property with this id.
    #[error("property not found: '{0}'")]
    NotFound(String),

    /// A coordinate field is not a number or decimal string.
    #[error("property '{property_id}' has a malformed {field}: '{value}'")]
    MalformedCoordinate {
        /// Offending property.
        property_id: String,
        /// `latitude` or `longitude`.
        field: &'static str,
        /// The raw value.
        value: String,
    },

    /// A coordinate parsed but is out of range.
    #[error("property '{property_id}' has an invalid location: {source}")]
    InvalidCoordinate {
        /// Offending property.
        property_id: String,
        /// Range failure.
        #[source]
        source: CoordinateError,
    },

    /// The remote catalog could not be reached or answered with an error.
    #[error("catalog request failed: {0}")]
    Network(String),

    /// The catalog file could not be read.
    #[error("failed to read catalog at {}: {source}", path.display())]
    ReadError {
        /// Catalog file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The catalog document is not valid JSON of the expected shape.
    #[error("failed to parse catalog: {source}")]
    ParseError {
        /// Underlying parse failure.
        #[from]
        source: serde_json::Error,
    },
}

/// Check a property id before it is used in a lookup or URL.
///
/// # Errors
///
/// Returns [`CatalogError::InvalidId`] if the id is empty, longer than 64
/// characters, or contains anything besides ASCII letters, digits, `_` and `-`.
pub fn validate_property_id(id: &str) -> std::result::Result<(), CatalogError> {
    if PROPERTY_ID.is_match(id) {
        Ok(())
    } else {
        Err(CatalogError::InvalidId(id.to_string()))
    }
}

/// A coordinate component as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum DecimalDegrees {
    /// A JSON number.
    Number(f64),
    /// A decimal string such as `"37.7749"`.
    Text(String),
    /// Anything else (`null`, booleans, objects); rejected on resolution.
    Other(serde_json::Value),
}

impl Default for DecimalDegrees {
    fn default() -> Self {
        Self::Other(serde_json::Value::Null)
    }
}

impl DecimalDegrees {
    fn parse(&self, property_id: &str, field: &'static str) -> std::result::Result<f64, CatalogError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Text(text) => {
                let trimmed = text.trim();
                if !DECIMAL.is_match(trimmed) {
                    return Err(CatalogError::MalformedCoordinate {
                        property_id: property_id.to_string(),
                        field,
                        value: text.clone(),
                    });
                }
                trimmed
                    .parse::<f64>()
                    .map_err(|_| CatalogError::MalformedCoordinate {
                        property_id: property_id.to_string(),
                        field,
                        value: text.clone(),
                    })
            }
            Self::Other(value) => Err(CatalogError::MalformedCoordinate {
                property_id: property_id.to_string(),
                field,
                value: value.to_string(),
            }),
        }
    }
}

impl From<f64> for DecimalDegrees {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// A property listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "12",
    "address": "1 Market St, San Francisco",
    "description": "Two-bedroom flat with bay views",
    "price": 1250000.0,
    "bedrooms": 2,
    "bathrooms": 1,
    "square_feet": 980,
    "image_url": "https://images.example.com/12.jpg",
    "latitude": "37.7936",
    "longitude": "-122.3958"
}))]
pub struct PropertyRecord {
    /// Catalog id.
    pub id: String,

    /// Street address.
    #[serde(default, alias = "location")]
    pub address: Option<String>,

    /// Listing text.
    #[serde(default)]
    pub description: Option<String>,

    /// Asking price.
    #[serde(default)]
    pub price: Option<f64>,

    /// Number of bedrooms.
    #[serde(default)]
    pub bedrooms: Option<u32>,

    /// Number of bathrooms.
    #[serde(default)]
    pub bathrooms: Option<u32>,

    /// Floor area.
    #[serde(default, alias = "squareFeet")]
    pub square_feet: Option<u32>,

    /// Listing photo.
    #[serde(default, alias = "imageUrl", alias = "imagerUrl")]
    pub image_url: Option<String>,

    /// Latitude of the lock, in degrees.
    #[serde(default)]
    pub latitude: DecimalDegrees,

    /// Longitude of the lock, in degrees.
    #[serde(default)]
    pub longitude: DecimalDegrees,
}

impl PropertyRecord {
    /// Resolve the record's geofence target.
    ///
    /// # Errors
    ///
    /// [`CatalogError::MalformedCoordinate`] for unparseable values,
    /// [`CatalogError::InvalidCoordinate`] for out-of-range ones.
    pub fn target(&self) -> std::result::Result<PropertyTarget, CatalogError> {
        let latitude = self.latitude.parse(&self.id, "latitude")?;
        let longitude = self.longitude.parse(&self.id, "longitude")?;
        let location =
            Coordinate::new(latitude, longitude).map_err(|source| CatalogError::InvalidCoordinate {
                property_id: self.id.clone(),
                source,
            })?;
        Ok(PropertyTarget::new(self.id.clone(), location))
    }
}

/// Source of property records.
#[async_trait]
pub trait PropertyCatalog: Send + Sync {
    /// All properties.
    async fn list_properties(&self) -> Result<Vec<PropertyRecord>>;

    /// One property record by id.
    async fn fetch_record(&self, id: &str) -> Result<PropertyRecord>;

    /// Resolve a property id to its geofence target.
    async fn fetch_property(&self, id: &str) -> Result<PropertyTarget> {
        validate_property_id(id)?;
        let record = self.fetch_record(id).await?;
        Ok(record.target()?)
    }
}

/// Build the catalog described by the configuration.
///
/// # Errors
///
/// Returns [`KeyfenceError::ConfigValidationError`] if the selected source is
/// missing its location or needs the `http` feature.
pub fn catalog_from_config(config: &CatalogConfig) -> Result<Arc<dyn PropertyCatalog>> {
    match config.source {
        CatalogSource::File => {
            let path = match &config.path {
                Some(path) => path.clone(),
                None => crate::config::default_data_dir()?.join("properties.json"),
            };
            Ok(Arc::new(JsonFileCatalog::new(path)))
        }
        CatalogSource::Http => http_catalog(config),
    }
}

#[cfg(feature = "http")]
fn http_catalog(config: &CatalogConfig) -> Result<Arc<dyn PropertyCatalog>> {
    let base_url = config.base_url.clone().ok_or_else(|| {
        KeyfenceError::ConfigValidationError("catalog.base_url: required for the http catalog".into())
    })?;
    Ok(Arc::new(HttpCatalog::new(base_url)?))
}

#[cfg(not(feature = "http"))]
fn http_catalog(_config: &CatalogConfig) -> Result<Arc<dyn PropertyCatalog>> {
    Err(KeyfenceError::ConfigValidationError(
        "catalog.source: http catalog requires the `http` feature".into(),
    ))
}

/// Catalog over a fixed set of records.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    records: Vec<PropertyRecord>,
}

impl MemoryCatalog {
    /// Create a catalog holding `records`.
    #[must_use]
    pub const fn new(records: Vec<PropertyRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl PropertyCatalog for MemoryCatalog {
    async fn list_properties(&self) -> Result<Vec<PropertyRecord>> {
        Ok(self.records.clone())
    }

    async fn fetch_record(&self, id: &str) -> Result<PropertyRecord> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()).into())
    }
}

/// Catalog backed by a JSON array of [`PropertyRecord`]s.
///
/// The file is read on every call. A missing file is an empty catalog.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    /// Create a catalog reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The catalog file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> std::result::Result<Vec<PropertyRecord>, CatalogError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Catalog file missing; treating as empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(CatalogError::ReadError {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl PropertyCatalog for JsonFileCatalog {
    async fn list_properties(&self) -> Result<Vec<PropertyRecord>> {
        Ok(self.load().await?)
    }

    async fn fetch_record(&self, id: &str) -> Result<PropertyRecord> {
        let mut by_id: HashMap<String, PropertyRecord> = self
            .load()
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        by_id
            .remove(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()).into())
    }
}

#[cfg(feature = "http")]
pub use http::HttpCatalog;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use tracing::debug;
    use url::Url;

    use super::{validate_property_id, CatalogError, PropertyCatalog, PropertyRecord};
    use crate::error::Result;

    const COLLECTION: &str = "houses";
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    /// Catalog served over HTTP as a REST collection.
    #[derive(Debug, Clone)]
    pub struct HttpCatalog {
        client: reqwest::Client,
        base_url: Url,
    }

    impl HttpCatalog {
        /// Create a catalog rooted at `base_url`.
        ///
        /// # Errors
        ///
        /// Returns [`CatalogError::Network`] if the HTTP client cannot be built.
        pub fn new(mut base_url: Url) -> std::result::Result<Self, CatalogError> {
            if !base_url.path().ends_with('/') {
                let path = format!("{}/", base_url.path());
                base_url.set_path(&path);
            }
            let client = reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| CatalogError::Network(e.to_string()))?;
            Ok(Self { client, base_url })
        }

        fn url(&self, path: &str) -> std::result::Result<Url, CatalogError> {
            self.base_url
                .join(path)
                .map_err(|e| CatalogError::Network(e.to_string()))
        }

        async fn get(&self, url: Url) -> std::result::Result<reqwest::Response, CatalogError> {
            debug!(%url, "GET catalog");
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| CatalogError::Network(e.to_string()))
        }
    }

    #[async_trait]
    impl PropertyCatalog for HttpCatalog {
        async fn list_properties(&self) -> Result<Vec<PropertyRecord>> {
            let response = self
                .get(self.url(COLLECTION)?)
                .await?
                .error_for_status()
                .map_err(|e| CatalogError::Network(e.to_string()))?;
            let body = response
                .text()
                .await
                .map_err(|e| CatalogError::Network(e.to_string()))?;
            Ok(serde_json::from_str(&body).map_err(CatalogError::from)?)
        }

        async fn fetch_record(&self, id: &str) -> Result<PropertyRecord> {
            validate_property_id(id)?;
            let response = self.get(self.url(&format!("{COLLECTION}/{id}"))?).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(CatalogError::NotFound(id.to_string()).into());
            }
            let response = response
                .error_for_status()
                .map_err(|e| CatalogError::Network(e.to_string()))?;
            let body = response
                .text()
                .await
                .map_err(|e| CatalogError::Network(e.to_string()))?;
            Ok(serde_json::from_str(&body).map_err(CatalogError::from)?)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_urls_extend_base_path() {
            let catalog =
                HttpCatalog::new(Url::parse("https://api.example.com/v1").unwrap()).unwrap();
            assert_eq!(
                catalog.url("houses/12").unwrap().as_str(),
                "https://api.example.com/v1/houses/12"
            );
        }
    }
}
