//! Shared value types and OpenAPI schemas.
//!
//! Coordinates are validated on construction (including deserialization), so a
//! [`Coordinate`] that exists is always inside the WGS84 latitude/longitude
//! ranges. Out-of-range values are rejected rather than clamped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Errors raised when constructing a [`Coordinate`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    /// Latitude outside [-90, 90] degrees, or not finite.
    #[error("Latitude {0} is outside the valid range [-90, 90]")]
    LatitudeOutOfRange(f64),

    /// Longitude outside [-180, 180] degrees, or not finite.
    #[error("Longitude {0} is outside the valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "RawCoordinate")]
#[schema(example = json!({"latitude": 37.7749, "longitude": -122.4194}))]
pub struct Coordinate {
    /// Latitude in degrees, [-90, 90].
    #[schema(example = 37.7749, minimum = -90.0, maximum = 90.0)]
    latitude: f64,

    /// Longitude in degrees, [-180, 180].
    #[schema(example = json!(-122.4194), minimum = -180.0, maximum = 180.0)]
    longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    /// Create a coordinate, rejecting out-of-range or non-finite values.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] naming the offending component.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Latitude in degrees.
    #[inline]
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    #[inline]
    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// The property a session is trying to unlock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "12",
    "location": {"latitude": 37.7749, "longitude": -122.4194}
}))]
pub struct PropertyTarget {
    /// Opaque catalog identifier.
    #[schema(example = "12")]
    pub id: String,

    /// Registered coordinates of the property.
    pub location: Coordinate,
}

impl PropertyTarget {
    /// Create a new target.
    pub fn new(id: impl Into<String>, location: Coordinate) -> Self {
        Self {
            id: id.into(),
            location,
        }
    }
}

/// Requested accuracy for a position fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PositionAccuracy {
    /// Best available fix (GPS).
    Highest,
}

/// A single device position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PositionSample {
    /// Where the device was.
    pub coordinate: Coordinate,

    /// Reported horizontal accuracy radius in meters.
    #[schema(example = 5.0)]
    pub accuracy_m: f64,

    /// When the fix was captured (UTC).
    pub captured_at: DateTime<Utc>,
}

impl PositionSample {
    /// Create a sample captured now.
    #[must_use]
    pub fn now(coordinate: Coordinate, accuracy_m: f64) -> Self {
        Self {
            coordinate,
            accuracy_m,
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_accepts_bounds() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert!(Coordinate::new(0.0, 0.0).is_ok());
    }

    #[test]
    fn test_coordinate_rejects_out_of_range() {
        assert_eq!(
            Coordinate::new(90.5, 0.0),
            Err(CoordinateError::LatitudeOutOfRange(90.5))
        );
        assert_eq!(
            Coordinate::new(0.0, -180.01),
            Err(CoordinateError::LongitudeOutOfRange(-180.01))
        );
    }

    #[test]
    fn test_coordinate_rejects_nan() {
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_coordinate_deserialization_is_validated() {
        let ok: Coordinate = serde_json::from_str(r#"{"latitude": 51.5, "longitude": -0.12}"#)
            .unwrap();
        assert!((ok.latitude() - 51.5).abs() < f64::EPSILON);

        let bad = serde_json::from_str::<Coordinate>(r#"{"latitude": 120.0, "longitude": 0.0}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_only_highest_accuracy_is_requested() {
        assert_eq!(
            serde_json::to_value(PositionAccuracy::Highest).unwrap(),
            serde_json::json!("highest")
        );
        assert!(serde_json::from_str::<PositionAccuracy>(r#""balanced""#).is_err());
    }
}
