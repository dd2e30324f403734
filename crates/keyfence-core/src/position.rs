//! Device position acquisition.
//!
//! The [`GeoPositionSource`] trait is the boundary to the device's location
//! services: it reports whether location access was granted and delivers
//! single position fixes. The engine never talks to a sensor directly.
//!
//! [`ReportedPositionSource`] adapts fixes submitted by a remote device (for
//! example over HTTP) to that trait.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;

use crate::types::{PositionAccuracy, PositionSample};

/// Outcome of a location permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// The user allowed location access.
    Granted,
    /// The user declined location access.
    Denied,
}

/// Why a position fix could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PositionError {
    /// No fix arrived before the deadline.
    #[error("timed out waiting for a position fix")]
    Timeout,

    /// The sensor could not produce a fix.
    #[error("position is unavailable")]
    Unavailable,

    /// Location access was withdrawn while sampling.
    #[error("location permission was revoked")]
    PermissionRevoked,
}

/// Supplier of location permission and position fixes.
#[async_trait]
pub trait GeoPositionSource: Send + Sync {
    /// Ask for location access.
    async fn request_permission(&self) -> PermissionStatus;

    /// Take one position fix at the requested accuracy.
    async fn current_position(
        &self,
        accuracy: PositionAccuracy,
    ) -> Result<PositionSample, PositionError>;
}

/// A report submitted by the device: its permission state and either a fix or
/// the error its sensor produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PositionReport {
    /// Whether the device granted location access.
    pub permission: PermissionStatus,

    /// The fix, when one was obtained.
    #[serde(default)]
    pub sample: Option<PositionSample>,

    /// The sensor error, when no fix was obtained.
    #[serde(default)]
    pub error: Option<PositionError>,
}

impl PositionReport {
    /// A granted report carrying a fix.
    #[must_use]
    pub const fn fix(sample: PositionSample) -> Self {
        Self {
            permission: PermissionStatus::Granted,
            sample: Some(sample),
            error: None,
        }
    }

    /// A report from a device that refused location access.
    #[must_use]
    pub const fn denied() -> Self {
        Self {
            permission: PermissionStatus::Denied,
            sample: None,
            error: None,
        }
    }

    /// A granted report whose sensor failed.
    #[must_use]
    pub const fn failed(error: PositionError) -> Self {
        Self {
            permission: PermissionStatus::Granted,
            sample: None,
            error: Some(error),
        }
    }
}

/// Position source fed by device-submitted [`PositionReport`]s.
///
/// Each report serves exactly one evaluation: a denied report is consumed by
/// the permission request, a granted one by the following position request.
/// Without a pending report, permission is treated as denied.
#[derive(Debug, Default)]
pub struct ReportedPositionSource {
    pending: Mutex<Option<PositionReport>>,
}

impl ReportedPositionSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the report for the next evaluation, replacing any unconsumed one.
    pub fn submit(&self, report: PositionReport) {
        let replaced = self.pending.lock().replace(report);
        if replaced.is_some() {
            debug!("Replaced an unconsumed position report");
        }
    }

    /// Drop any unconsumed report.
    pub fn discard(&self) {
        self.pending.lock().take();
    }

    /// Returns `true` if a report is waiting to be consumed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

#[async_trait]
impl GeoPositionSource for ReportedPositionSource {
    async fn request_permission(&self) -> PermissionStatus {
        let mut pending = self.pending.lock();
        match pending.as_ref().map(|r| r.permission) {
            Some(PermissionStatus::Granted) => PermissionStatus::Granted,
            Some(PermissionStatus::Denied) | None => {
                pending.take();
                PermissionStatus::Denied
            }
        }
    }

    async fn current_position(
        &self,
        _accuracy: PositionAccuracy,
    ) -> Result<PositionSample, PositionError> {
        let report = self.pending.lock().take();
        match report {
            Some(PositionReport {
                permission: PermissionStatus::Denied,
                ..
            }) => Err(PositionError::PermissionRevoked),
            Some(PositionReport {
                error: Some(error), ..
            }) => Err(error),
            Some(PositionReport {
                sample: Some(sample),
                ..
            }) => Ok(sample),
            _ => Err(PositionError::Unavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;

    fn sample() -> PositionSample {
        PositionSample::now(Coordinate::new(48.8584, 2.2945).unwrap(), 4.0)
    }

    #[tokio::test]
    async fn test_reported_fix_is_consumed_once() {
        let source = ReportedPositionSource::new();
        source.submit(PositionReport::fix(sample()));

        assert_eq!(source.request_permission().await, PermissionStatus::Granted);
        assert!(source.current_position(PositionAccuracy::Highest).await.is_ok());
        assert!(!source.has_pending());
        assert_eq!(
            source.current_position(PositionAccuracy::Highest).await,
            Err(PositionError::Unavailable)
        );
    }

    #[tokio::test]
    async fn test_denied_report_is_consumed_by_permission_request() {
        let source = ReportedPositionSource::new();
        source.submit(PositionReport::denied());

        assert_eq!(source.request_permission().await, PermissionStatus::Denied);
        assert!(!source.has_pending());
    }

    #[tokio::test]
    async fn test_missing_report_means_denied() {
        let source = ReportedPositionSource::new();
        assert_eq!(source.request_permission().await, PermissionStatus::Denied);
    }

    #[tokio::test]
    async fn test_sensor_error_is_forwarded() {
        let source = ReportedPositionSource::new();
        source.submit(PositionReport::failed(PositionError::Timeout));

        assert_eq!(source.request_permission().await, PermissionStatus::Granted);
        assert_eq!(
            source.current_position(PositionAccuracy::Highest).await,
            Err(PositionError::Timeout)
        );
    }

    #[test]
    fn test_report_deserialization() {
        let json = r#"{
            "permission": "granted",
            "sample": {
                "coordinate": {"latitude": 1.0, "longitude": 2.0},
                "accuracy_m": 3.5,
                "captured_at": "2025-01-15T03:30:00Z"
            }
        }"#;
        let report: PositionReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.permission, PermissionStatus::Granted);
        assert!(report.error.is_none());

        let report: PositionReport =
            serde_json::from_str(r#"{"permission": "granted", "error": "permission_revoked"}"#)
                .unwrap();
        assert_eq!(report.error, Some(PositionError::PermissionRevoked));
    }
}
